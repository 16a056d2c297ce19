//! Shared fixtures for the integration tests: WARC builders, index lines,
//! wiremock mounts and registry archives.

#![allow(dead_code)]

use company_etl::Config;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock index answers on.
pub const INDEX_PATH: &str = "/cc-index";

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// One uncompressed WARC record.
pub fn warc_record(warc_type: &str, target_uri: &str, block: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: {}\r\nWARC-Target-URI: {}\r\nContent-Length: {}\r\n\r\n",
        warc_type,
        target_uri,
        block.len()
    )
    .into_bytes();
    out.extend_from_slice(block);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// A request/response pair as the public archive stores it: one gzip member
/// per record.
pub fn warc_capture(target_uri: &str, html: &str) -> Vec<u8> {
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", target_uri);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        html.len(),
        html
    );

    let mut out = gzip(&warc_record("request", target_uri, request.as_bytes()));
    out.extend(gzip(&warc_record("response", target_uri, response.as_bytes())));
    out
}

pub fn index_line(url: &str, filename: &str, offset: u64, length: u64) -> String {
    serde_json::json!({
        "urlkey": "au,com)/",
        "url": url,
        "filename": filename,
        "offset": offset.to_string(),
        "length": length.to_string(),
        "status": "200",
    })
    .to_string()
}

/// Serve `body` as index page `page` for the `*.au/*` pattern.
pub async fn mount_index_page(server: &MockServer, page: usize, body: String) {
    Mock::given(method("GET"))
        .and(path(INDEX_PATH))
        .and(query_param("url", "*.au/*"))
        .and(query_param("output", "json"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serve `body` as a 206 for exactly `range` of `/file`, expecting `calls` hits.
pub async fn mount_archive_range(server: &MockServer, file: &str, range: &str, body: Vec<u8>, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", file)))
        .and(header("Range", range))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
        .expect(calls)
        .mount(server)
        .await;
}

/// Configuration pointing every remote at `server` and artifacts at `data_dir`.
pub fn test_config(server: &MockServer, data_dir: &Path, extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("DATA_DIR".into(), data_dir.display().to_string());
    vars.insert("CC_INDEX_URL".into(), format!("{}{}", server.uri(), INDEX_PATH));
    vars.insert("CC_DATA_URL".into(), server.uri());
    vars.insert("CC_FETCH_TIMEOUT_SECS".into(), "5".into());
    vars.insert("CC_INDEX_TIMEOUT_SECS".into(), "5".into());
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(move |key| vars.get(key).cloned()).unwrap()
}

/// ABR-shaped entry.
pub fn abr_entry(abn: &str, name: &str, status: &str, state: &str) -> String {
    format!(
        "<ABR><ABN status=\"ACT\">{}</ABN><EntityStatus>{}</EntityStatus>\
         <MainEntity><NonIndividualName><NonIndividualNameText>{}</NonIndividualNameText></NonIndividualName>\
         <BusinessAddress><AddressDetails><State>{}</State></AddressDetails></BusinessAddress></MainEntity>\
         <EntityName>{}</EntityName></ABR>",
        abn, status, name, state, name
    )
}

pub fn abr_document(entries: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Transfer>\n{}\n</Transfer>\n",
        entries.join("\n")
    )
}

/// Write a zip archive with the given `(name, contents)` members.
pub fn write_zip(path: &Path, members: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, contents) in members {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}
