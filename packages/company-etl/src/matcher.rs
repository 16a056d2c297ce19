//! Entity matcher: pairs crawl records with registry records through the
//! classifier.
//!
//! Pairs are visited company-major (every registry record for the first
//! company, then the second, ...). A pair is confirmed when the classifier's
//! answer contains the affirmative token, case-insensitively. A failed call
//! counts as "no" and the run continues.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::MatchSettings;
use crate::types::{CompanyRecord, MatchResult, RegistryRecord};

/// Substring that marks a positive answer.
pub const AFFIRMATIVE_TOKEN: &str = "yes";

/// Corporate boilerplate ignored by the name pre-filter.
const NAME_STOPWORDS: [&str; 8] = [
    "pty", "ltd", "limited", "the", "co", "inc", "and", "company",
];

/// The question put to the classifier for one pair.
pub fn build_prompt(company: &CompanyRecord, registry: &RegistryRecord) -> String {
    format!(
        "Do these refer to the same company?\n\n\
         Website Company:\n\
         Name: {}\n\
         URL: {}\n\n\
         ABR Record:\n\
         Entity Name: {}\n\
         ABN: {}\n\n\
         Answer YES or NO. Just say 'YES' if you are confident they refer to the same company.",
        company.company_name,
        company.root_url,
        registry.entity_name.as_deref().unwrap_or_default(),
        registry.registry_id,
    )
}

/// Whether a classifier answer confirms the pair.
pub fn is_affirmative(answer: &str) -> bool {
    answer.to_lowercase().contains(AFFIRMATIVE_TOKEN)
}

fn name_tokens(name: &str) -> HashSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !NAME_STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Token Jaccard similarity of two names, in `0.0..=1.0`.
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = name_tokens(a);
    let b = name_tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f32 / total as f32
}

/// Counters for one matching run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub pairs: usize,
    /// Pairs skipped by the name pre-filter
    pub filtered: usize,
    pub classified: usize,
    pub confirmed: usize,
    pub failures: usize,
    /// Confirmations for a registry id that was already matched
    pub duplicate_ids: usize,
    /// The pair cap stopped the run early
    pub capped: bool,
    /// Pairs never visited because of the cap
    pub unevaluated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<MatchResult>,
    pub stats: MatchStats,
}

pub struct Matcher {
    classifier: Arc<dyn Classifier>,
    min_similarity: f32,
    max_pairs: Option<usize>,
}

impl Matcher {
    /// Every pair goes to the classifier.
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            min_similarity: 0.0,
            max_pairs: None,
        }
    }

    pub fn from_settings(classifier: Arc<dyn Classifier>, settings: &MatchSettings) -> Self {
        Self::new(classifier)
            .with_min_similarity(settings.min_similarity)
            .with_max_pairs(settings.max_pairs)
    }

    /// Skip pairs whose names share less than `threshold` of their tokens.
    pub fn with_min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = threshold.clamp(0.0, 1.0);
        self
    }

    /// Stop after this many classifier calls.
    pub fn with_max_pairs(mut self, max_pairs: Option<usize>) -> Self {
        self.max_pairs = max_pairs;
        self
    }

    fn passes_filter(&self, company: &CompanyRecord, registry: &RegistryRecord) -> bool {
        if self.min_similarity <= 0.0 {
            return true;
        }
        let entity_name = registry.entity_name.as_deref().unwrap_or_default();
        name_similarity(&company.company_name, entity_name) >= self.min_similarity
    }

    /// Classify every pair and collect the confirmed ones.
    ///
    /// Results follow pair order. A registry id confirmed for several
    /// companies appears once per company.
    pub async fn match_records(
        &self,
        companies: &[CompanyRecord],
        registry: &[RegistryRecord],
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        let mut matched_ids: HashMap<&str, usize> = HashMap::new();

        info!(
            companies = companies.len(),
            registry = registry.len(),
            classifier = self.classifier.name(),
            "Matching crawl records against registry"
        );

        let total = companies.len() * registry.len();

        'companies: for company in companies {
            for entity in registry {
                if !self.passes_filter(company, entity) {
                    outcome.stats.pairs += 1;
                    outcome.stats.filtered += 1;
                    continue;
                }

                // Only pairs that need a classifier call count against the cap
                if let Some(limit) = self.max_pairs {
                    if outcome.stats.classified >= limit {
                        outcome.stats.capped = true;
                        outcome.stats.unevaluated = total - outcome.stats.pairs;
                        warn!(
                            limit,
                            unevaluated = outcome.stats.unevaluated,
                            "Classifier pair cap reached, stopping match run"
                        );
                        break 'companies;
                    }
                }

                outcome.stats.pairs += 1;
                outcome.stats.classified += 1;
                let prompt = build_prompt(company, entity);
                let answer = match self.classifier.classify(&prompt).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(
                            root_url = %company.root_url,
                            abn = %entity.registry_id,
                            error = %e,
                            "Classifier call failed, treating as no match"
                        );
                        outcome.stats.failures += 1;
                        continue;
                    }
                };

                if !is_affirmative(&answer) {
                    continue;
                }

                let seen = matched_ids.entry(entity.registry_id.as_str()).or_insert(0);
                *seen += 1;
                if *seen > 1 {
                    warn!(
                        abn = %entity.registry_id,
                        root_url = %company.root_url,
                        "Registry id matched by more than one company"
                    );
                    outcome.stats.duplicate_ids += 1;
                }

                debug!(
                    company = %company.company_name,
                    abn = %entity.registry_id,
                    "Match confirmed"
                );
                outcome.stats.confirmed += 1;
                outcome.matches.push(MatchResult::from_pair(company, entity));
            }
        }

        info!(
            pairs = outcome.stats.pairs,
            classified = outcome.stats.classified,
            confirmed = outcome.stats.confirmed,
            failures = outcome.stats.failures,
            "Matching complete"
        );

        outcome
    }
}
