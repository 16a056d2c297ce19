//! Registry stage over zip and directory inputs.

mod common;

use common::*;
use company_etl::artifacts::{self, ArtifactPaths};
use company_etl::pipeline;
use company_etl::registry::{extract_registry, RegistrySource, REGISTRY_XML_DIR, REGISTRY_ZIP};
use company_etl::types::RegistryRecord;
use company_etl::{Config, PipelineError};

fn config_for(data_dir: &std::path::Path) -> Config {
    let dir = data_dir.display().to_string();
    Config::from_lookup(move |key| (key == "DATA_DIR").then(|| dir.clone())).unwrap()
}

#[tokio::test]
async fn test_registry_stage_reads_zip_members() {
    let data_dir = tempfile::tempdir().unwrap();
    let first = abr_document(&[
        abr_entry("51824753556", "ACME PTY LTD", "Active", "NSW"),
        abr_entry("11111111111", "GONE PTY LTD", "Cancelled", "VIC"),
    ]);
    let second = abr_document(&[abr_entry("22222222222", "BONDI SURF CO", "Active", "NSW")]);
    write_zip(
        &data_dir.path().join(REGISTRY_ZIP),
        &[
            ("20250101_Public01.xml", first.as_str()),
            ("README.txt", "not xml"),
            ("20250101_Public02.xml", second.as_str()),
        ],
    );

    let stats = pipeline::registry_stage(&config_for(data_dir.path()))
        .await
        .unwrap();

    assert_eq!(stats.sources_read, 2);
    assert_eq!(stats.inactive, 1);

    let paths = ArtifactPaths::new(data_dir.path());
    let records: Vec<RegistryRecord> = artifacts::read_json(&paths.registry_records()).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.registry_id.as_str()).collect();
    assert_eq!(ids, vec!["51824753556", "22222222222"]);
    assert!(records.iter().all(|r| r.status == "Active"));
    assert_eq!(records[0].jurisdiction.as_deref(), Some("NSW"));

    let text = std::fs::read_to_string(paths.registry_records()).unwrap();
    assert!(text.contains("\n  {\n    \"abn\": \"51824753556\""));
}

#[test]
fn test_directory_source_skips_broken_file() {
    let data_dir = tempfile::tempdir().unwrap();
    let xml_dir = data_dir.path().join(REGISTRY_XML_DIR);
    std::fs::create_dir(&xml_dir).unwrap();

    std::fs::write(
        xml_dir.join("a.xml"),
        abr_document(&[abr_entry("1", "ALPHA", "Active", "QLD")]),
    )
    .unwrap();
    // Emits one entry, then breaks
    std::fs::write(
        xml_dir.join("b.xml"),
        format!(
            "<Transfer>{}<ABR><ABN>3</Wrong></ABR></Transfer>",
            abr_entry("2", "BETA", "Active", "WA")
        ),
    )
    .unwrap();
    std::fs::write(
        xml_dir.join("c.xml"),
        abr_document(&[abr_entry("4", "GAMMA", "Active", "SA")]),
    )
    .unwrap();
    std::fs::write(xml_dir.join("notes.txt"), "ignored").unwrap();

    let source = RegistrySource::discover(data_dir.path()).unwrap();
    assert_eq!(source, RegistrySource::Directory(xml_dir));

    let collector = extract_registry(&source, 2).unwrap();

    assert_eq!(collector.stats.sources_read, 2);
    assert_eq!(collector.stats.sources_failed, 1);
    let ids: Vec<String> = collector
        .into_records()
        .into_iter()
        .map(|r| r.registry_id)
        .collect();
    assert_eq!(ids, vec!["1", "2", "4"]);
}

#[test]
fn test_zip_preferred_over_directory() {
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(data_dir.path().join(REGISTRY_XML_DIR)).unwrap();
    write_zip(&data_dir.path().join(REGISTRY_ZIP), &[]);

    assert!(matches!(
        RegistrySource::discover(data_dir.path()).unwrap(),
        RegistrySource::Zip(_)
    ));
}

#[tokio::test]
async fn test_missing_registry_input_fails_stage() {
    let data_dir = tempfile::tempdir().unwrap();

    assert!(matches!(
        RegistrySource::discover(data_dir.path()),
        Err(PipelineError::Config(_))
    ));
    assert!(pipeline::registry_stage(&config_for(data_dir.path()))
        .await
        .is_err());
}
