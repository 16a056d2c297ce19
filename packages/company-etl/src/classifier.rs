//! Binary same-entity classifier.
//!
//! The matcher only needs "prompt in, free text out". The trait keeps the
//! language model behind a seam so tests can script answers.

use async_trait::async_trait;
use gemini_client::GeminiClient;
use std::time::Duration;

use crate::credentials::ClassifierCredentials;
use crate::error::{PipelineError, Result};

/// Answers a single prompt with free text.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Gemini-backed classifier.
#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    client: GeminiClient,
}

impl GeminiClassifier {
    pub fn new(credentials: &ClassifierCredentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        let client = GeminiClient::new(credentials.api_key.expose())
            .with_base_url(credentials.base_url.clone())
            .with_model(credentials.model.clone())
            .with_http_client(http);

        Ok(Self { client })
    }

    pub fn from_client(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        Ok(self.client.generate_text(prompt).await?)
    }

    fn name(&self) -> &str {
        self.client.model()
    }
}
