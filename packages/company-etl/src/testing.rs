//! Testing utilities including mock implementations.
//!
//! Lets the matcher and the pipeline stages run without real classifier calls.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::classifier::Classifier;
use crate::error::{PipelineError, Result};

/// A scripted classifier.
///
/// Rules are checked in insertion order; the first whose needle appears in
/// the prompt decides the answer. Unmatched prompts get the default answer
/// ("NO" unless changed).
pub struct MockClassifier {
    rules: Vec<(String, MockAnswer)>,
    default_answer: String,
    calls: Arc<RwLock<Vec<String>>>,
}

#[derive(Debug, Clone)]
enum MockAnswer {
    Text(String),
    Failure,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_answer: "NO".to_string(),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `answer` to prompts containing `needle`.
    pub fn with_answer(mut self, needle: impl Into<String>, answer: impl Into<String>) -> Self {
        self.rules
            .push((needle.into(), MockAnswer::Text(answer.into())));
        self
    }

    /// Fail prompts containing `needle` with a transport error.
    pub fn with_failure(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), MockAnswer::Failure));
        self
    }

    pub fn with_default_answer(mut self, answer: impl Into<String>) -> Self {
        self.default_answer = answer.into();
        self
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        self.calls.write().unwrap().push(prompt.to_string());

        let rule = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone());

        match rule {
            Some(MockAnswer::Text(answer)) => Ok(answer),
            Some(MockAnswer::Failure) => Err(PipelineError::Transport(
                "mock classifier failure".into(),
            )),
            None => Ok(self.default_answer.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
