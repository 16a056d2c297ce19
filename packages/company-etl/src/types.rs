//! Records handed between pipeline stages.
//!
//! Field names on disk follow the artifacts the scheduled pipeline has always
//! written (`website_url`, `abn`, `state`), so older runs stay readable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A locator hit: one capture inside a remote archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCandidate {
    /// URL as captured
    pub source_url: String,

    /// Archive file path relative to the data host
    pub archive_file: String,

    pub byte_offset: u64,

    pub byte_length: u64,
}

impl CrawlCandidate {
    /// Inclusive byte range for a `Range` header.
    ///
    /// `None` when the range is empty or its end does not fit in a `u64`.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        let last = self.byte_length.checked_sub(1)?;
        let end = self.byte_offset.checked_add(last)?;
        Some((self.byte_offset, end))
    }

    /// `Range` header value, `bytes=<start>-<end>`.
    pub fn range_header(&self) -> Option<String> {
        let (start, end) = self.byte_range()?;
        Some(format!("bytes={}-{}", start, end))
    }
}

/// Raw HTTP response body recovered from one archived transaction.
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    pub raw_content: Vec<u8>,

    /// WARC header fields, plus `http_status` and `http_*` response headers
    pub metadata: HashMap<String, String>,
}

impl PageCapture {
    pub fn new(raw_content: Vec<u8>) -> Self {
        Self {
            raw_content,
            metadata: HashMap::new(),
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn html(&self) -> String {
        String::from_utf8_lossy(&self.raw_content).into_owned()
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.metadata.get("WARC-Target-URI").map(String::as_str)
    }
}

/// A company discovered on the web.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    /// Normalized `scheme://host/`
    #[serde(rename = "website_url")]
    pub root_url: String,

    pub company_name: String,

    /// Keywords hint, empty when the page declares none
    #[serde(default)]
    pub industry: String,
}

/// An active entity from the business register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// ABN
    #[serde(rename = "abn")]
    pub registry_id: String,

    #[serde(default)]
    pub entity_name: Option<String>,

    #[serde(default = "default_status")]
    pub status: String,

    /// State or territory
    #[serde(rename = "state", default)]
    pub jurisdiction: Option<String>,
}

fn default_status() -> String {
    ACTIVE_STATUS.to_string()
}

/// The only registry status that is retained.
pub const ACTIVE_STATUS: &str = "Active";

/// A crawl record the classifier judged to be the same entity as a registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(rename = "abn")]
    pub registry_id: String,

    pub company_name: String,

    #[serde(rename = "website_url")]
    pub root_url: String,

    #[serde(rename = "state", default)]
    pub jurisdiction: Option<String>,
}

impl MatchResult {
    pub fn from_pair(company: &CompanyRecord, registry: &RegistryRecord) -> Self {
        Self {
            registry_id: registry.registry_id.clone(),
            company_name: company.company_name.clone(),
            root_url: company.root_url.clone(),
            jurisdiction: registry.jurisdiction.clone(),
        }
    }
}
