//! One crawl record per root URL.
//!
//! First seen in traversal order wins. Later records for the same root URL are
//! dropped without looking at their content, so the accepted set depends on
//! input order.

use std::collections::HashSet;
use tracing::debug;

use crate::types::CompanyRecord;

#[derive(Debug, Default)]
pub struct CrawlDeduplicator {
    seen: HashSet<String>,
    accepted: Vec<CompanyRecord>,
    dropped: usize,
}

impl CrawlDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a root URL already has an accepted record.
    pub fn is_seen(&self, root_url: &str) -> bool {
        self.seen.contains(root_url)
    }

    /// Accept `record` unless its root URL was already accepted.
    pub fn offer(&mut self, record: CompanyRecord) -> bool {
        if self.seen.contains(&record.root_url) {
            debug!(root_url = %record.root_url, "Duplicate root URL dropped");
            self.dropped += 1;
            return false;
        }
        self.seen.insert(record.root_url.clone());
        self.accepted.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn records(&self) -> &[CompanyRecord] {
        &self.accepted
    }

    /// Accepted records in acceptance order.
    pub fn into_records(self) -> Vec<CompanyRecord> {
        self.accepted
    }
}

/// Deduplicate a sequence in one pass.
pub fn dedup_records(records: impl IntoIterator<Item = CompanyRecord>) -> Vec<CompanyRecord> {
    let mut dedup = CrawlDeduplicator::new();
    for record in records {
        dedup.offer(record);
    }
    dedup.into_records()
}
