//! Registry extractor: streams the ABR bulk extract into active records.
//!
//! The dump is far larger than memory, so it is never loaded whole. A pull
//! parser walks the XML and hands each entry element (a fixed depth below the
//! root) to an [`EntryVisitor`], which decides whether the walk continues.
//! Inside an entry, each field is the text of the first element with that
//! local name, however deeply it is nested.

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::types::{RegistryRecord, ACTIVE_STATUS};

pub const ID_FIELD: &str = "ABN";
pub const NAME_FIELD: &str = "EntityName";
pub const STATUS_FIELD: &str = "EntityStatus";
pub const JURISDICTION_FIELD: &str = "State";

/// Bulk extract archive name inside the data directory.
pub const REGISTRY_ZIP: &str = "abr.zip";
/// Directory of already-extracted XML files.
pub const REGISTRY_XML_DIR: &str = "extracted_xml";

/// One entry element, flattened to `local name -> text`.
#[derive(Debug, Clone, Default)]
pub struct RegistryEntry {
    pub fields: HashMap<String, String>,
    /// Why the entry could not be read cleanly
    pub malformed: Option<String>,
}

impl RegistryEntry {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    /// The record for this entry, if it has an identifier and is active.
    pub fn to_record(&self) -> Option<RegistryRecord> {
        if self.is_malformed() {
            return None;
        }
        let registry_id = self.get(ID_FIELD).filter(|id| !id.is_empty())?;
        let status = self.get(STATUS_FIELD)?;
        if status != ACTIVE_STATUS {
            return None;
        }

        Some(RegistryRecord {
            registry_id: registry_id.to_string(),
            entity_name: self.get(NAME_FIELD).map(str::to_string),
            status: status.to_string(),
            jurisdiction: self.get(JURISDICTION_FIELD).map(str::to_string),
        })
    }
}

/// Receives entries one at a time during a walk.
pub trait EntryVisitor {
    /// Return `Break` to stop the walk after this entry.
    fn visit(&mut self, entry: RegistryEntry) -> ControlFlow<()>;
}

impl<F> EntryVisitor for F
where
    F: FnMut(RegistryEntry) -> ControlFlow<()>,
{
    fn visit(&mut self, entry: RegistryEntry) -> ControlFlow<()> {
        self(entry)
    }
}

/// Counters for one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub entries: usize,
    pub malformed: usize,
    pub stopped_early: bool,
}

struct EntryBuilder {
    entry: RegistryEntry,
    /// Open field elements: local name and accumulated text
    open: Vec<(String, String)>,
}

impl EntryBuilder {
    fn new() -> Self {
        Self {
            entry: RegistryEntry::default(),
            open: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some((_, buf)) = self.open.last_mut() {
            buf.push_str(text);
        }
    }

    fn close_field(&mut self) {
        if let Some((name, text)) = self.open.pop() {
            self.entry
                .fields
                .entry(name)
                .or_insert_with(|| text.trim().to_string());
        }
    }

    fn mark_malformed(&mut self, reason: String) {
        if self.entry.malformed.is_none() {
            self.entry.malformed = Some(reason);
        }
    }
}

/// Walk every entry at `entry_depth` (the root element is depth 1).
///
/// A reader-level error ends the walk with `PipelineError::Parse`; entries
/// visited before it have already been delivered.
pub fn walk_entries<R, V>(source: R, entry_depth: usize, visitor: &mut V) -> Result<WalkSummary>
where
    R: BufRead,
    V: EntryVisitor + ?Sized,
{
    let mut reader = Reader::from_reader(source);
    // Keep whitespace: entity references split text into several events.
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<EntryBuilder> = None;
    let mut summary = WalkSummary::default();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            PipelineError::Parse(format!(
                "XML error at byte {}: {}",
                reader.error_position(),
                e
            ))
        })?;

        match event {
            Event::Start(ref e) => {
                depth += 1;
                if depth == entry_depth {
                    current = Some(EntryBuilder::new());
                } else if depth > entry_depth {
                    if let Some(builder) = current.as_mut() {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        builder.open.push((name, String::new()));
                    }
                }
            }
            Event::Empty(ref e) => {
                if depth + 1 == entry_depth {
                    // <Entry/> with no fields
                    if deliver(RegistryEntry::default(), visitor, &mut summary).is_break() {
                        break;
                    }
                } else if depth + 1 > entry_depth {
                    if let Some(builder) = current.as_mut() {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        builder.entry.fields.entry(name).or_default();
                    }
                }
            }
            Event::Text(ref e) => {
                if let Some(builder) = current.as_mut() {
                    builder.push_text(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::CData(ref e) => {
                if let Some(builder) = current.as_mut() {
                    builder.push_text(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(ref e) => {
                if let Some(builder) = current.as_mut() {
                    match resolve_reference(e) {
                        Ok(text) => builder.push_text(&text),
                        Err(reason) => builder.mark_malformed(reason),
                    }
                }
            }
            Event::End(_) => {
                if depth == entry_depth {
                    if let Some(builder) = current.take() {
                        if deliver(builder.entry, visitor, &mut summary).is_break() {
                            break;
                        }
                    }
                } else if depth > entry_depth {
                    if let Some(builder) = current.as_mut() {
                        builder.close_field();
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(summary)
}

fn deliver<V: EntryVisitor + ?Sized>(
    entry: RegistryEntry,
    visitor: &mut V,
    summary: &mut WalkSummary,
) -> ControlFlow<()> {
    summary.entries += 1;
    if let Some(reason) = &entry.malformed {
        debug!(reason = %reason, "Malformed registry entry");
        summary.malformed += 1;
    }
    let flow = visitor.visit(entry);
    if flow.is_break() {
        summary.stopped_early = true;
    }
    flow
}

/// Text for `&name;` or `&#N;`. Unknown entities make the entry malformed.
fn resolve_reference(reference: &quick_xml::events::BytesRef<'_>) -> std::result::Result<String, String> {
    if reference.is_char_ref() {
        return match reference.resolve_char_ref() {
            Ok(Some(ch)) => Ok(ch.to_string()),
            Ok(None) => Err("empty character reference".to_string()),
            Err(e) => Err(format!("bad character reference: {}", e)),
        };
    }

    let name = reference
        .decode()
        .map_err(|e| format!("undecodable entity name: {}", e))?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| format!("unknown entity &{};", name))
}

/// Visitor that keeps active entries with an identifier, first occurrence of
/// each identifier wins.
#[derive(Debug, Default)]
pub struct RegistryCollector {
    records: Vec<RegistryRecord>,
    ids: HashSet<String>,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sources_read: usize,
    pub sources_failed: usize,
    pub entries: usize,
    pub malformed: usize,
    pub missing_id: usize,
    pub inactive: usize,
    pub duplicates: usize,
}

impl RegistryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<RegistryRecord> {
        self.records
    }
}

impl EntryVisitor for RegistryCollector {
    fn visit(&mut self, entry: RegistryEntry) -> ControlFlow<()> {
        self.stats.entries += 1;

        if entry.is_malformed() {
            self.stats.malformed += 1;
            return ControlFlow::Continue(());
        }
        if entry.get(ID_FIELD).map_or(true, str::is_empty) {
            self.stats.missing_id += 1;
            return ControlFlow::Continue(());
        }

        match entry.to_record() {
            Some(record) => {
                if self.ids.insert(record.registry_id.clone()) {
                    self.records.push(record);
                } else {
                    self.stats.duplicates += 1;
                }
            }
            None => self.stats.inactive += 1,
        }
        ControlFlow::Continue(())
    }
}

/// Where the registry dump lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    /// Bulk extract archive; `.xml` members are streamed straight out of it
    Zip(PathBuf),
    /// Directory of `.xml` files
    Directory(PathBuf),
}

impl RegistrySource {
    /// Prefer `abr.zip`, fall back to `extracted_xml/`.
    pub fn discover(data_dir: &Path) -> Result<Self> {
        let zip_path = data_dir.join(REGISTRY_ZIP);
        if zip_path.is_file() {
            return Ok(Self::Zip(zip_path));
        }
        let xml_dir = data_dir.join(REGISTRY_XML_DIR);
        if xml_dir.is_dir() {
            return Ok(Self::Directory(xml_dir));
        }
        Err(PipelineError::Config(format!(
            "registry input not found: expected {} or {}",
            zip_path.display(),
            xml_dir.display()
        )))
    }
}

fn is_xml(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".xml")
}

/// Stream every XML file in `source` through a [`RegistryCollector`].
///
/// A file that cannot be opened or parsed is logged and skipped; records it
/// produced before failing are kept. Failing to open the source itself is
/// fatal.
pub fn extract_registry(source: &RegistrySource, entry_depth: usize) -> Result<RegistryCollector> {
    let mut collector = RegistryCollector::new();

    match source {
        RegistrySource::Zip(path) => {
            let file = File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            info!(path = %path.display(), members = archive.len(), "Reading registry archive");

            for index in 0..archive.len() {
                let member = match archive.by_index(index) {
                    Ok(member) => member,
                    Err(e) => {
                        warn!(index, error = %e, "Unreadable archive member");
                        collector.stats.sources_failed += 1;
                        continue;
                    }
                };
                let name = member.name().to_string();
                if member.is_dir() || !is_xml(&name) {
                    continue;
                }
                walk_source(&name, BufReader::new(member), entry_depth, &mut collector);
            }
        }
        RegistrySource::Directory(dir) => {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && p.file_name().and_then(|n| n.to_str()).map_or(false, is_xml))
                .collect();
            paths.sort();
            info!(dir = %dir.display(), files = paths.len(), "Reading registry XML files");

            for path in paths {
                let name = path.display().to_string();
                match File::open(&path) {
                    Ok(file) => walk_source(&name, BufReader::new(file), entry_depth, &mut collector),
                    Err(e) => {
                        warn!(file = %name, error = %e, "Cannot open registry file");
                        collector.stats.sources_failed += 1;
                    }
                }
            }
        }
    }

    info!(
        records = collector.len(),
        entries = collector.stats.entries,
        inactive = collector.stats.inactive,
        malformed = collector.stats.malformed,
        failed_sources = collector.stats.sources_failed,
        "Registry extraction complete"
    );

    Ok(collector)
}

fn walk_source<R: BufRead>(name: &str, reader: R, entry_depth: usize, collector: &mut RegistryCollector) {
    let before = collector.len();
    match walk_entries(reader, entry_depth, collector) {
        Ok(summary) => {
            collector.stats.sources_read += 1;
            info!(
                file = %name,
                entries = summary.entries,
                records = collector.len() - before,
                "Processed registry XML"
            );
        }
        Err(e) => {
            collector.stats.sources_failed += 1;
            warn!(
                file = %name,
                kept = collector.len() - before,
                error = %e,
                "Error parsing registry XML"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(xml: &str) -> (RegistryCollector, Result<WalkSummary>) {
        let mut collector = RegistryCollector::new();
        let result = walk_entries(xml.as_bytes(), 2, &mut collector);
        (collector, result)
    }

    #[test]
    fn test_active_entry_emitted() {
        let xml = r#"<?xml version="1.0"?>
            <Transfer>
              <ABR><ABN>51824753556</ABN><EntityName>ACME PTY LTD</EntityName><EntityStatus>Active</EntityStatus><State>NSW</State></ABR>
            </Transfer>"#;
        let (collector, result) = collect(xml);

        assert_eq!(result.unwrap().entries, 1);
        let records = collector.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].registry_id, "51824753556");
        assert_eq!(records[0].entity_name.as_deref(), Some("ACME PTY LTD"));
        assert_eq!(records[0].status, "Active");
        assert_eq!(records[0].jurisdiction.as_deref(), Some("NSW"));
    }

    #[test]
    fn test_cancelled_entry_not_emitted() {
        let xml = "<Root><Entry><ABN>123</ABN><EntityName>Acme</EntityName><EntityStatus>Cancelled</EntityStatus></Entry></Root>";
        let (collector, _) = collect(xml);

        assert!(collector.is_empty());
        assert_eq!(collector.stats.inactive, 1);
    }

    #[test]
    fn test_only_active_status_retained() {
        let xml = r#"<Root>
            <E><ABN>1</ABN><EntityStatus>Active</EntityStatus></E>
            <E><ABN>2</ABN><EntityStatus>active</EntityStatus></E>
            <E><ABN>3</ABN><EntityStatus>Cancelled</EntityStatus></E>
            <E><ABN>4</ABN></E>
        </Root>"#;
        let (collector, _) = collect(xml);
        let records = collector.into_records();

        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|r| r.status == "Active"));
    }

    #[test]
    fn test_missing_id_skipped() {
        let xml = "<Root><E><ABN></ABN><EntityStatus>Active</EntityStatus></E><E><EntityStatus>Active</EntityStatus></E></Root>";
        let (collector, _) = collect(xml);

        assert!(collector.is_empty());
        assert_eq!(collector.stats.missing_id, 2);
    }

    #[test]
    fn test_nested_fields_and_entities() {
        let xml = r#"<Transfer>
            <ABR>
              <ABN status="ACT">11000000001</ABN>
              <EntityName>Smith &amp; Jones &#x26; Co</EntityName>
              <EntityStatus>Active</EntityStatus>
              <BusinessAddress><AddressDetails><State>VIC</State><Postcode>3000</Postcode></AddressDetails></BusinessAddress>
            </ABR>
        </Transfer>"#;
        let (collector, _) = collect(xml);
        let records = collector.into_records();

        assert_eq!(records[0].entity_name.as_deref(), Some("Smith & Jones & Co"));
        assert_eq!(records[0].jurisdiction.as_deref(), Some("VIC"));
    }

    #[test]
    fn test_malformed_entry_does_not_stop_stream() {
        let xml = r#"<Root>
            <E><ABN>1</ABN><EntityName>Bad &bogus; Name</EntityName><EntityStatus>Active</EntityStatus></E>
            <E><ABN>2</ABN><EntityName>Good</EntityName><EntityStatus>Active</EntityStatus></E>
        </Root>"#;
        let (collector, result) = collect(xml);
        let summary = result.unwrap();

        assert_eq!(summary.entries, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(collector.stats.malformed, 1);
        let records = collector.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].registry_id, "2");
    }

    #[test]
    fn test_visitor_can_stop_early() {
        let xml = "<Root><E><ABN>1</ABN></E><E><ABN>2</ABN></E><E><ABN>3</ABN></E></Root>";
        let mut seen = Vec::new();
        let mut visitor = |entry: RegistryEntry| {
            seen.push(entry.get("ABN").unwrap_or_default().to_string());
            if seen.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let summary = walk_entries(xml.as_bytes(), 2, &mut visitor).unwrap();

        assert!(summary.stopped_early);
        assert_eq!(summary.entries, 2);
        assert_eq!(seen, vec!["1", "2"]);
    }

    #[test]
    fn test_reader_error_keeps_earlier_records() {
        let xml = "<Root><E><ABN>1</ABN><EntityStatus>Active</EntityStatus></E><E><ABN>2</Wrong></E></Root>";
        let (collector, result) = collect(xml);

        assert!(matches!(result, Err(PipelineError::Parse(_))));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_first_wins() {
        let xml = r#"<Root>
            <E><ABN>1</ABN><EntityName>First</EntityName><EntityStatus>Active</EntityStatus></E>
            <E><ABN>1</ABN><EntityName>Second</EntityName><EntityStatus>Active</EntityStatus></E>
        </Root>"#;
        let (collector, _) = collect(xml);

        assert_eq!(collector.stats.duplicates, 1);
        assert_eq!(collector.into_records()[0].entity_name.as_deref(), Some("First"));
    }

    #[test]
    fn test_custom_entry_depth() {
        let xml = "<A><B><E><ABN>9</ABN><EntityStatus>Active</EntityStatus></E></B></A>";
        let mut collector = RegistryCollector::new();
        walk_entries(xml.as_bytes(), 3, &mut collector).unwrap();

        assert_eq!(collector.into_records()[0].registry_id, "9");
    }
}
