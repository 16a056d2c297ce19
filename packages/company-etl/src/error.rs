//! Typed errors for the pipeline library.
//!
//! Library code returns these; stage orchestration and the binary wrap them
//! in `anyhow` with context.

use thiserror::Error;

/// Errors that can occur in a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credential or invalid setting. Fatal to the stage.
    #[error("config error: {0}")]
    Config(String),

    /// Index query, range fetch or classifier call failed
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Unexpected HTTP status
    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Malformed remote or on-disk data
    #[error("parse error: {0}")]
    Parse(String),

    /// Archive container could not be decoded
    #[error("archive error: {0}")]
    Warc(#[from] WarcError),

    /// Sink operation failed
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Transport(Box::new(e))
    }
}

impl From<gemini_client::GeminiError> for PipelineError {
    fn from(e: gemini_client::GeminiError) -> Self {
        match e {
            gemini_client::GeminiError::Config(msg) => PipelineError::Config(msg),
            other => PipelineError::Transport(Box::new(other)),
        }
    }
}

/// Errors raised while decoding a WARC container.
#[derive(Debug, Error)]
pub enum WarcError {
    #[error("missing WARC version line")]
    MissingVersion,

    #[error("truncated header block")]
    TruncatedHeaders,

    #[error("missing or invalid Content-Length")]
    BadContentLength,

    #[error("record block truncated: expected {expected} bytes, found {found}")]
    TruncatedBlock { expected: usize, found: usize },

    #[error("malformed HTTP payload: {0}")]
    Http(String),

    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for WARC decoding.
pub type WarcResult<T> = std::result::Result<T, WarcError>;
