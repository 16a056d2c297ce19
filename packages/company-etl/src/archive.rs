//! Record extractor: byte-range fetch of one capture and WARC decoding.

use reqwest::header::RANGE;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::config::CrawlSettings;
use crate::error::{PipelineError, Result, WarcResult};
use crate::types::{CrawlCandidate, PageCapture};
use crate::warc::{self, WarcReader};

/// Normalize a URL to `scheme://host[:port]/`.
///
/// Path, query, fragment and userinfo are dropped. Returns `None` when the URL
/// has no scheme or host. Normalizing a normalized URL returns it unchanged.
pub fn root_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?;

    let mut root = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        root.push(':');
        root.push_str(&port.to_string());
    }
    root.push('/');
    Some(root)
}

/// Pulls single captures out of remote archive files.
pub struct RecordExtractor {
    client: reqwest::Client,
    data_url: String,
}

impl RecordExtractor {
    pub fn new(settings: &CrawlSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, &settings.data_url))
    }

    pub fn with_client(client: reqwest::Client, data_url: impl Into<String>) -> Self {
        Self {
            client,
            data_url: data_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Full URL of the archive file holding `candidate`.
    pub fn archive_url(&self, candidate: &CrawlCandidate) -> String {
        format!(
            "{}/{}",
            self.data_url,
            candidate.archive_file.trim_start_matches('/')
        )
    }

    /// Fetch exactly the candidate's byte range. Anything but 206 is an error.
    pub async fn fetch_range(&self, candidate: &CrawlCandidate) -> Result<Vec<u8>> {
        let url = self.archive_url(candidate);
        let range = candidate.range_header().ok_or_else(|| {
            PipelineError::Parse(format!(
                "invalid byte range {}+{} for {}",
                candidate.byte_offset, candidate.byte_length, url
            ))
        })?;
        debug!(url = %url, range = %range, "Range fetch");

        let response = self
            .client
            .get(&url)
            .header(RANGE, range)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(PipelineError::Status {
                status: status.as_u16(),
                url,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch and decode the page bodies captured for `candidate`.
    pub async fn extract(&self, candidate: &CrawlCandidate) -> Result<Vec<PageCapture>> {
        let bytes = self.fetch_range(candidate).await?;
        Ok(decode_captures(&bytes)?)
    }
}

/// Decode every `response` record in a container into a capture.
///
/// A record whose HTTP payload cannot be parsed is skipped; a broken
/// container fails the whole call.
pub fn decode_captures(bytes: &[u8]) -> WarcResult<Vec<PageCapture>> {
    let data = warc::decompress(bytes)?;
    let mut captures = Vec::new();

    for record in WarcReader::new(&data) {
        let record = record?;
        if !record.is_response() {
            continue;
        }

        let response = match warc::parse_http_response(&record.block) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    target_uri = record.header("WARC-Target-URI").unwrap_or_default(),
                    error = %e,
                    "Skipping unreadable response record"
                );
                continue;
            }
        };

        let mut capture = PageCapture::new(response.body);
        capture.metadata.extend(record.headers);
        capture
            .metadata
            .insert("http_status".to_string(), response.status.to_string());
        for (name, value) in response.headers {
            capture
                .metadata
                .insert(format!("http_{}", name.to_ascii_lowercase()), value);
        }
        captures.push(capture);
    }

    Ok(captures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_url_drops_path_query_fragment() {
        assert_eq!(
            root_url("https://www.acme.com.au/about/team?ref=x#top").as_deref(),
            Some("https://www.acme.com.au/")
        );
        assert_eq!(
            root_url("http://user:pw@Acme.COM.au:8080/x").as_deref(),
            Some("http://acme.com.au:8080/")
        );
        assert_eq!(
            root_url("https://acme.com.au:443/").as_deref(),
            Some("https://acme.com.au/")
        );
    }

    #[test]
    fn test_root_url_is_idempotent() {
        for url in [
            "https://www.acme.com.au/about?x=1",
            "http://bondi.net.au:8080/a/b",
            "https://xn--caf-dma.com.au/",
        ] {
            let once = root_url(url).unwrap();
            assert_eq!(root_url(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn test_root_url_rejects_unparseable() {
        assert!(root_url("not a url").is_none());
        assert!(root_url("mailto:info@acme.com.au").is_none());
        assert!(root_url("file:///etc/hosts").is_none());
        assert!(root_url("").is_none());
    }

    #[test]
    fn test_archive_url_joins_paths() {
        let extractor =
            RecordExtractor::with_client(reqwest::Client::new(), "https://data.example.org/");
        let candidate = CrawlCandidate {
            source_url: "https://acme.com.au/".into(),
            archive_file: "crawl-data/CC/x.warc.gz".into(),
            byte_offset: 1,
            byte_length: 1,
        };
        assert_eq!(
            extractor.archive_url(&candidate),
            "https://data.example.org/crawl-data/CC/x.warc.gz"
        );
    }

    #[test]
    fn test_decode_captures_keeps_response_bodies_only() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<title>Acme</title>";
        let request = b"GET / HTTP/1.1\r\nHost: acme.com.au\r\n\r\n";
        let mut data = Vec::new();
        for (kind, block) in [("request", &request[..]), ("response", &response[..])] {
            data.extend(
                format!(
                    "WARC/1.0\r\nWARC-Type: {}\r\nContent-Length: {}\r\n\r\n",
                    kind,
                    block.len()
                )
                .into_bytes(),
            );
            data.extend_from_slice(block);
            data.extend_from_slice(b"\r\n\r\n");
        }

        let captures = decode_captures(&data).unwrap();

        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].html(), "<title>Acme</title>");
        assert_eq!(captures[0].metadata["http_status"], "200");
        assert_eq!(captures[0].metadata["http_content-type"], "text/html");
        assert_eq!(captures[0].metadata["WARC-Type"], "response");
    }

    #[test]
    fn test_decode_captures_skips_unreadable_response() {
        let broken = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        let no_status = b"garbage\r\n\r\n<title>Nope</title>";
        let good = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<title>Acme</title>";
        let mut data = Vec::new();
        for block in [&broken[..], &no_status[..], &good[..]] {
            data.extend(
                format!(
                    "WARC/1.0\r\nWARC-Type: response\r\nContent-Length: {}\r\n\r\n",
                    block.len()
                )
                .into_bytes(),
            );
            data.extend_from_slice(block);
            data.extend_from_slice(b"\r\n\r\n");
        }

        let captures = decode_captures(&data).unwrap();

        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].html(), "<title>Acme</title>");
    }

    #[test]
    fn test_decode_captures_rejects_garbage() {
        assert!(decode_captures(b"\x00\x01garbage").is_err());
    }
}
