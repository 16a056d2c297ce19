//! Stage orchestration.
//!
//! Each stage reads its inputs from the data directory, does its work, and
//! writes its outputs back, so an external scheduler can run the stages as
//! separate tasks. `run_all` chains them in one process.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{root_url, RecordExtractor};
use crate::artifacts::{self, ArtifactPaths};
use crate::classifier::{Classifier, GeminiClassifier};
use crate::config::Config;
use crate::dedup::CrawlDeduplicator;
use crate::fields;
use crate::locator::ArchiveLocator;
use crate::matcher::{MatchStats, Matcher};
use crate::registry::{self, RegistrySource};
use crate::sink::{persist_all, MatchSink, PersistStats, PostgresSink};
use crate::types::{CompanyRecord, CrawlCandidate, MatchResult, RegistryRecord};

/// Counters for one crawl traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub candidates: usize,
    /// The locator stopped on an error
    pub locator_incomplete: bool,
    /// Source URL without scheme or host
    pub rejected_urls: usize,
    /// Root URL already accepted, not fetched
    pub already_seen: usize,
    pub fetch_failures: usize,
    pub captures: usize,
    /// Captures with no usable company name
    pub unnamed: usize,
    pub duplicates: usize,
    pub records: usize,
}

/// Turn candidates into deduplicated crawl records, one candidate at a time.
///
/// Per-candidate failures are logged and skipped.
pub async fn collect_companies(
    extractor: &RecordExtractor,
    candidates: &[CrawlCandidate],
    stats: &mut CrawlStats,
) -> Vec<CompanyRecord> {
    let mut dedup = CrawlDeduplicator::new();

    for candidate in candidates {
        let Some(root) = root_url(&candidate.source_url) else {
            debug!(url = %candidate.source_url, "Rejected candidate URL");
            stats.rejected_urls += 1;
            continue;
        };

        if dedup.is_seen(&root) {
            stats.already_seen += 1;
            continue;
        }

        let captures = match extractor.extract(candidate).await {
            Ok(captures) => captures,
            Err(e) => {
                warn!(url = %candidate.source_url, error = %e, "Error processing record");
                stats.fetch_failures += 1;
                continue;
            }
        };

        for capture in captures {
            stats.captures += 1;
            match fields::company_record(&root, &capture.html()) {
                Some(record) => {
                    if !dedup.offer(record) {
                        stats.duplicates += 1;
                    }
                }
                None => stats.unnamed += 1,
            }
        }
    }

    stats.records = dedup.len();
    dedup.into_records()
}

/// Locate, fetch, extract and deduplicate.
pub async fn crawl(
    locator: &ArchiveLocator,
    extractor: &RecordExtractor,
    domain_suffix: &str,
    budget: usize,
) -> (Vec<CompanyRecord>, CrawlStats) {
    let outcome = locator.locate(domain_suffix, budget).await;
    let mut stats = CrawlStats {
        candidates: outcome.candidates.len(),
        locator_incomplete: !outcome.is_complete(),
        ..Default::default()
    };

    let records = collect_companies(extractor, &outcome.candidates, &mut stats).await;
    (records, stats)
}

/// Crawl stage: writes `commoncrawl.json` and `australian_companies.csv`.
pub async fn crawl_stage(config: &Config) -> Result<CrawlStats> {
    let paths = ArtifactPaths::new(&config.data_dir);
    paths.ensure_root().context("Failed to create data directory")?;

    let locator = ArchiveLocator::new(&config.crawl).context("Failed to build index client")?;
    let extractor = RecordExtractor::new(&config.crawl).context("Failed to build archive client")?;

    let (records, stats) = crawl(
        &locator,
        &extractor,
        &config.crawl.domain_suffix,
        config.crawl.result_budget,
    )
    .await;

    artifacts::write_json(&paths.crawl_records(), &records, false)
        .context("Failed to write crawl records")?;
    artifacts::write_company_csv(&paths.crawl_records_csv(), &records)
        .context("Failed to write crawl CSV")?;

    info!(
        candidates = stats.candidates,
        records = stats.records,
        fetch_failures = stats.fetch_failures,
        locator_incomplete = stats.locator_incomplete,
        "Crawl stage complete"
    );
    Ok(stats)
}

/// Registry stage: writes `abr_data.json`.
pub async fn registry_stage(config: &Config) -> Result<registry::RegistryStats> {
    let paths = ArtifactPaths::new(&config.data_dir);
    let source = RegistrySource::discover(paths.root()).context("Registry input unavailable")?;
    let depth = config.registry.entry_depth;

    let collector = tokio::task::spawn_blocking(move || registry::extract_registry(&source, depth))
        .await
        .context("Registry extraction task panicked")?
        .context("Failed to read registry input")?;

    let stats = collector.stats;
    let records = collector.into_records();
    artifacts::write_json(&paths.registry_records(), &records, true)
        .context("Failed to write registry records")?;

    info!(records = records.len(), "Registry stage complete");
    Ok(stats)
}

/// Match stage with the configured Gemini classifier.
pub async fn match_stage(config: &Config) -> Result<MatchStats> {
    let credentials = config.require_classifier()?;
    let classifier = GeminiClassifier::new(credentials, config.matching.classifier_timeout)
        .context("Failed to build classifier")?;
    match_stage_with(config, Arc::new(classifier)).await
}

/// Match stage: reads both record sets, writes `matched_data.json`.
pub async fn match_stage_with(config: &Config, classifier: Arc<dyn Classifier>) -> Result<MatchStats> {
    let paths = ArtifactPaths::new(&config.data_dir);
    let companies: Vec<CompanyRecord> =
        artifacts::read_json(&paths.crawl_records()).context("Failed to read crawl records")?;
    let registry: Vec<RegistryRecord> = artifacts::read_json(&paths.registry_records())
        .context("Failed to read registry records")?;

    let matcher = Matcher::from_settings(classifier, &config.matching);
    let outcome = matcher.match_records(&companies, &registry).await;

    artifacts::write_json(&paths.matched_records(), &outcome.matches, false)
        .context("Failed to write matched records")?;

    info!(
        matches = outcome.matches.len(),
        unevaluated = outcome.stats.unevaluated,
        "Match stage complete"
    );
    Ok(outcome.stats)
}

/// Persist stage against the configured Postgres database.
pub async fn persist_stage(config: &Config) -> Result<PersistStats> {
    let sink = PostgresSink::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    persist_stage_with(config, &sink).await
}

/// Persist stage: loads `matched_data.json` into `sink`.
pub async fn persist_stage_with(config: &Config, sink: &dyn MatchSink) -> Result<PersistStats> {
    let paths = ArtifactPaths::new(&config.data_dir);
    let matches: Vec<MatchResult> =
        artifacts::read_json(&paths.matched_records()).context("Failed to read matched records")?;

    persist_all(sink, &matches)
        .await
        .context("Failed to persist matches")
}

/// Every stage in order, in one process.
pub async fn run_all(config: &Config) -> Result<()> {
    crawl_stage(config).await.context("Crawl stage failed")?;
    registry_stage(config).await.context("Registry stage failed")?;
    match_stage(config).await.context("Match stage failed")?;
    persist_stage(config).await.context("Persist stage failed")?;
    Ok(())
}
