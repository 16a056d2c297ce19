//! Archive locator: finds captures for a host suffix in the crawl index.
//!
//! The index answers with one JSON object per line. The body is read chunk
//! by chunk so the run stops pulling data as soon as the budget is met.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::CrawlSettings;
use crate::error::{PipelineError, Result};
use crate::types::CrawlCandidate;

/// Offsets arrive as strings from the public index but as numbers from some mirrors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn positive(&self) -> Option<u64> {
        match self {
            Numeric::Int(n) if *n > 0 => Some(*n as u64),
            Numeric::Float(f) if *f >= 1.0 && f.fract() == 0.0 => Some(*f as u64),
            Numeric::Text(s) => s.trim().parse::<u64>().ok().filter(|n| *n > 0),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexLine {
    url: Option<String>,
    filename: Option<String>,
    offset: Option<Numeric>,
    length: Option<Numeric>,
}

/// Parse one index line.
///
/// `Ok(None)` means the line is valid JSON but not a usable candidate
/// (missing field, zero or negative offset/length, or a range ending past
/// `u64::MAX`).
pub fn parse_index_line(line: &str) -> std::result::Result<Option<CrawlCandidate>, serde_json::Error> {
    let entry: IndexLine = serde_json::from_str(line)?;

    let url = entry.url.filter(|u| !u.is_empty());
    let filename = entry.filename.filter(|f| !f.is_empty());
    let offset = entry.offset.as_ref().and_then(Numeric::positive);
    let length = entry.length.as_ref().and_then(Numeric::positive);

    Ok(match (url, filename, offset, length) {
        (Some(source_url), Some(archive_file), Some(byte_offset), Some(byte_length)) => {
            Some(CrawlCandidate {
                source_url,
                archive_file,
                byte_offset,
                byte_length,
            })
            .filter(|candidate| candidate.byte_range().is_some())
        }
        _ => None,
    })
}

/// `*.au/*` style URL pattern for a host suffix.
pub fn url_pattern(domain_suffix: &str) -> String {
    format!("*.{}/*", domain_suffix.trim_start_matches('.'))
}

/// Result of a locator run.
///
/// A transport or parse error ends the run early; whatever was collected
/// before it is still returned.
#[derive(Debug, Default)]
pub struct LocateOutcome {
    pub candidates: Vec<CrawlCandidate>,
    pub error: Option<PipelineError>,
}

impl LocateOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Client for the line-delimited JSON crawl index.
pub struct ArchiveLocator {
    client: reqwest::Client,
    index_url: String,
    max_pages: usize,
}

impl ArchiveLocator {
    pub fn new(settings: &CrawlSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.index_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, &settings.index_url).with_max_pages(settings.max_pages))
    }

    pub fn with_client(client: reqwest::Client, index_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            max_pages: 1,
        }
    }

    /// Number of index pages to walk before giving up on the budget.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Collect up to `budget` candidates for hosts under `domain_suffix`.
    pub async fn locate(&self, domain_suffix: &str, budget: usize) -> LocateOutcome {
        let pattern = url_pattern(domain_suffix);
        let mut outcome = LocateOutcome::default();

        info!(index = %self.index_url, pattern = %pattern, budget, "Querying crawl index");

        if budget == 0 {
            return outcome;
        }

        for page in 0..self.max_pages {
            match self.read_page(&pattern, page, budget, &mut outcome.candidates).await {
                Ok(0) => {
                    debug!(page, "Index page empty, stream ended");
                    break;
                }
                Ok(lines) => {
                    debug!(page, lines, collected = outcome.candidates.len(), "Index page read");
                }
                Err(e) => {
                    warn!(
                        page,
                        collected = outcome.candidates.len(),
                        error = %e,
                        "Index query failed, keeping candidates collected so far"
                    );
                    outcome.error = Some(e);
                    break;
                }
            }

            if outcome.candidates.len() >= budget {
                break;
            }
        }

        info!(
            candidates = outcome.candidates.len(),
            complete = outcome.is_complete(),
            "Index query finished"
        );

        outcome
    }

    /// Stream one index page into `candidates`. Returns the number of
    /// non-blank lines seen.
    async fn read_page(
        &self,
        pattern: &str,
        page: usize,
        budget: usize,
        candidates: &mut Vec<CrawlCandidate>,
    ) -> Result<usize> {
        let page = page.to_string();
        let mut response = self
            .client
            .get(&self.index_url)
            .query(&[("url", pattern), ("output", "json"), ("page", page.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Status {
                status: status.as_u16(),
                url: self.index_url.clone(),
            });
        }

        let mut pending: Vec<u8> = Vec::new();
        let mut lines = 0usize;

        while let Some(chunk) = response.chunk().await? {
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                if accept_line(&line, candidates, &mut lines)? && candidates.len() >= budget {
                    return Ok(lines);
                }
            }
        }

        if !pending.is_empty() {
            accept_line(&pending, candidates, &mut lines)?;
        }

        Ok(lines)
    }
}

/// Returns true when a candidate was pushed.
fn accept_line(raw: &[u8], candidates: &mut Vec<CrawlCandidate>, lines: &mut usize) -> Result<bool> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    *lines += 1;

    match parse_index_line(line) {
        Ok(Some(candidate)) => {
            candidates.push(candidate);
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(e) => Err(PipelineError::Parse(format!("index line {}: {}", lines, e))),
    }
}
