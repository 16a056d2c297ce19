//! Hand-off files between stages.
//!
//! Each stage reads its inputs from the data directory and writes its
//! outputs there, so stages can run as separate processes in any scheduler.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::types::CompanyRecord;

/// Deduplicated crawl records.
pub const CRAWL_RECORDS: &str = "commoncrawl.json";
/// Spreadsheet mirror of the crawl records.
pub const CRAWL_RECORDS_CSV: &str = "australian_companies.csv";
/// Active registry records.
pub const REGISTRY_RECORDS: &str = "abr_data.json";
/// Confirmed pairs.
pub const MATCHED_RECORDS: &str = "matched_data.json";

/// CSV column headers, in record field order.
pub const CSV_HEADER: [&str; 3] = ["Website URL", "Company Name", "Industry"];

/// Paths of every artifact under one data directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn crawl_records(&self) -> PathBuf {
        self.root.join(CRAWL_RECORDS)
    }

    pub fn crawl_records_csv(&self) -> PathBuf {
        self.root.join(CRAWL_RECORDS_CSV)
    }

    pub fn registry_records(&self) -> PathBuf {
        self.root.join(REGISTRY_RECORDS)
    }

    pub fn matched_records(&self) -> PathBuf {
        self.root.join(MATCHED_RECORDS)
    }

    /// Create the directory if missing.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

/// Write `records` as a JSON array. `pretty` indents by two spaces.
pub fn write_json<T: Serialize>(path: &Path, records: &[T], pretty: bool) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, records)?;
    } else {
        serde_json::to_writer(&mut writer, records)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), records = records.len(), "Wrote JSON artifact");
    Ok(())
}

/// Read a JSON array written by an earlier stage.
///
/// A missing file is a config error naming the stage input.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.is_file() {
        return Err(PipelineError::Config(format!(
            "missing stage input {}",
            path.display()
        )));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write the crawl records as CSV with a fixed header row.
pub fn write_company_csv(path: &Path, records: &[CompanyRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record([
            record.root_url.as_str(),
            record.company_name.as_str(),
            record.industry.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistryRecord;

    #[test]
    fn test_json_roundtrip_and_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        let records = vec![RegistryRecord {
            registry_id: "1".into(),
            entity_name: Some("ACME".into()),
            status: "Active".into(),
            jurisdiction: None,
        }];

        write_json(&paths.registry_records(), &records, true).unwrap();
        let text = fs::read_to_string(paths.registry_records()).unwrap();
        assert!(text.contains("\n  {"));
        assert!(text.contains("\"abn\": \"1\""));

        let back: Vec<RegistryRecord> = read_json(&paths.registry_records()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_missing_input_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<Vec<CompanyRecord>> = read_json(&dir.path().join(CRAWL_RECORDS));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CRAWL_RECORDS_CSV);
        write_company_csv(
            &path,
            &[CompanyRecord {
                root_url: "https://acme.com.au/".into(),
                company_name: "Acme, Inc".into(),
                industry: "plumbing".into(),
            }],
        )
        .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Website URL,Company Name,Industry"));
        assert_eq!(lines.next(), Some("https://acme.com.au/,\"Acme, Inc\",plumbing"));
    }
}
