//! WARC container decoding.
//!
//! A fetched byte range holds one or more WARC records, each usually its own
//! gzip member. Records are yielded one at a time from the decompressed
//! buffer; `response` records carry an HTTP transaction whose body is the
//! captured page.

use flate2::read::MultiGzDecoder;
use std::borrow::Cow;
use std::io::Read;

use crate::error::{WarcError, WarcResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One WARC record.
#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub block: Vec<u8>,
}

impl WarcRecord {
    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// `WARC-Type`: response, request, metadata, warcinfo, ...
    pub fn record_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn is_response(&self) -> bool {
        self.record_type()
            .map(|t| t.eq_ignore_ascii_case("response"))
            .unwrap_or(false)
    }
}

/// Decompress when the input is gzip; pass through otherwise.
pub fn decompress(bytes: &[u8]) -> WarcResult<Cow<'_, [u8]>> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::with_capacity(bytes.len() * 4);
        MultiGzDecoder::new(bytes).read_to_end(&mut out)?;
        Ok(Cow::Owned(out))
    } else {
        Ok(Cow::Borrowed(bytes))
    }
}

/// Forward-only reader over records in an uncompressed WARC buffer.
pub struct WarcReader<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> WarcReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    fn skip_blank_lines(&mut self) {
        while self.pos < self.data.len() && matches!(self.data[self.pos], b'\r' | b'\n') {
            self.pos += 1;
        }
    }

    fn read_record(&mut self) -> WarcResult<WarcRecord> {
        let rest = &self.data[self.pos..];
        if !rest.starts_with(b"WARC/") {
            return Err(WarcError::MissingVersion);
        }

        let (head_len, body_start) = split_head(rest).ok_or(WarcError::TruncatedHeaders)?;
        let head = String::from_utf8_lossy(&rest[..head_len]);
        let mut lines = head.lines();
        let version = lines.next().unwrap_or_default().trim().to_string();
        let headers = parse_header_lines(lines);

        let length: usize = header_value(&headers, "Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .ok_or(WarcError::BadContentLength)?;

        let available = rest.len() - body_start;
        if available < length {
            return Err(WarcError::TruncatedBlock {
                expected: length,
                found: available,
            });
        }

        let block = rest[body_start..body_start + length].to_vec();
        self.pos += body_start + length;

        Ok(WarcRecord {
            version,
            headers,
            block,
        })
    }
}

impl Iterator for WarcReader<'_> {
    type Item = WarcResult<WarcRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_blank_lines();
        if self.pos >= self.data.len() {
            return None;
        }

        let record = self.read_record();
        // Record boundaries are lost after a bad record.
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

/// HTTP transaction stored in a `response` record.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body with transfer and content encodings removed
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Parse the block of a `response` record.
pub fn parse_http_response(block: &[u8]) -> WarcResult<HttpResponse> {
    let (head_len, body_start) =
        split_head(block).ok_or_else(|| WarcError::Http("missing header terminator".into()))?;
    let head = String::from_utf8_lossy(&block[..head_len]);
    let mut lines = head.lines();

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let protocol = parts.next().unwrap_or_default();
    if !protocol.starts_with("HTTP/") {
        return Err(WarcError::Http(format!("bad status line: {:?}", status_line)));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WarcError::Http(format!("bad status code: {:?}", status_line)))?;

    let headers = parse_header_lines(lines);
    let mut body = block[body_start..].to_vec();

    if header_value(&headers, "Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
    {
        body = dechunk(&body)?;
    }

    if header_value(&headers, "Content-Encoding")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "gzip" || v == "x-gzip"
        })
        .unwrap_or(false)
    {
        let mut decoded = Vec::with_capacity(body.len() * 4);
        MultiGzDecoder::new(body.as_slice()).read_to_end(&mut decoded)?;
        body = decoded;
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Remove HTTP/1.1 chunked framing.
fn dechunk(data: &[u8]) -> WarcResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;

    loop {
        let line_end = find(&data[pos..], b"\r\n")
            .map(|i| pos + i)
            .ok_or_else(|| WarcError::Http("unterminated chunk size".into()))?;
        let size_line = String::from_utf8_lossy(&data[pos..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| WarcError::Http(format!("bad chunk size: {:?}", size_hex)))?;
        pos = line_end + 2;

        if size == 0 {
            break;
        }
        let end = pos
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| WarcError::Http("chunk exceeds body".into()))?;
        out.extend_from_slice(&data[pos..end]);
        pos = end;

        if data[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
    }

    Ok(out)
}

/// Length of the header block and the offset where the body starts.
///
/// The earliest blank line ends the head, CRLF or bare LF.
fn split_head(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(data, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(data, b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn record(warc_type: &str, block: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\nWARC-Type: {}\r\nWARC-Target-URI: https://acme.com.au/\r\nContent-Length: {}\r\n\r\n",
            warc_type,
            block.len()
        )
        .into_bytes();
        out.extend_from_slice(block);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_reads_multiple_records() {
        let mut data = record("request", b"GET / HTTP/1.1\r\n\r\n");
        data.extend(record("response", b"HTTP/1.1 200 OK\r\n\r\n<html></html>"));

        let records: Vec<_> = WarcReader::new(&data).collect::<WarcResult<_>>().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type(), Some("request"));
        assert!(records[1].is_response());
        assert_eq!(records[1].header("warc-target-uri"), Some("https://acme.com.au/"));
        assert_eq!(records[1].version, "WARC/1.0");
    }

    #[test]
    fn test_gzip_members_are_concatenated() {
        let mut data = gzip(&record("request", b"GET / HTTP/1.1\r\n\r\n"));
        data.extend(gzip(&record("response", b"HTTP/1.1 200 OK\r\n\r\nbody")));

        let plain = decompress(&data).unwrap();
        let records: Vec<_> = WarcReader::new(&plain).collect::<WarcResult<_>>().unwrap();

        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_truncated_block_is_error() {
        let data = b"WARC/1.0\r\nWARC-Type: response\r\nContent-Length: 100\r\n\r\nshort";
        let mut reader = WarcReader::new(data);

        assert!(matches!(
            reader.next(),
            Some(Err(WarcError::TruncatedBlock { expected: 100, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_garbage_is_missing_version() {
        let mut reader = WarcReader::new(b"<html>not a warc</html>");
        assert!(matches!(reader.next(), Some(Err(WarcError::MissingVersion))));
    }

    #[test]
    fn test_parse_http_response_dechunks_and_gunzips() {
        let html = b"<title>Acme</title>";
        let compressed = gzip(html);

        let mut chunked = format!("{:x}\r\n", compressed.len()).into_bytes();
        chunked.extend_from_slice(&compressed);
        chunked.extend_from_slice(b"\r\n0\r\n\r\n");

        let mut block =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n"
                .to_vec();
        block.extend_from_slice(&chunked);

        let response = parse_http_response(&block).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, html);
    }

    #[test]
    fn test_oversized_chunk_size_is_error() {
        let block = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        assert!(matches!(parse_http_response(block), Err(WarcError::Http(_))));

        let short = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\nabc\r\n0\r\n\r\n";
        assert!(matches!(parse_http_response(short), Err(WarcError::Http(_))));
    }

    #[test]
    fn test_lf_only_head_ends_at_first_blank_line() {
        let block = b"HTTP/1.1 200 OK\nContent-Type: text/html\n\n<p>a</p>\r\n\r\n<p>b</p>";
        let response = parse_http_response(block).unwrap();

        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.body, b"<p>a</p>\r\n\r\n<p>b</p>");
    }

    #[test]
    fn test_parse_http_response_rejects_bad_status_line() {
        assert!(parse_http_response(b"garbage\r\n\r\nbody").is_err());
        assert!(parse_http_response(b"HTTP/1.1 abc\r\n\r\nbody").is_err());
    }
}
