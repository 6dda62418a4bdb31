//! Custom error types for bifextract.
//!
//! This module defines all error types used throughout the crawler.
//! All library functions return `Result<T, BifError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for bifextract operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum BifError {
    /// Network/HTTP transport error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status from a fetch
    #[error("HTTP status {status} from {url}")]
    Status {
        /// Status code returned by the server
        status: u16,
        /// Request URL (without query string)
        url: String,
    },

    /// Retry budget used up on transient failures
    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        /// Request URL (without query string)
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Description of the last failure
        last: String,
    },

    /// External API returned an error payload
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BifError {
    /// Whether a fetch that failed with this error is worth another attempt.
    ///
    /// Transport failures, rate limiting, gateway/server errors and malformed
    /// bodies are transient; any other status is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            BifError::Network(_) | BifError::Parse(_) => true,
            BifError::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// True when the failure means "nothing available" rather than a bug.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BifError::Exhausted { .. } | BifError::Status { .. })
    }
}

/// Status codes that are retried with backoff.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias using `BifError`
pub type Result<T> = std::result::Result<T, BifError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BifError::Parse(msg.to_string()))
    }
}
