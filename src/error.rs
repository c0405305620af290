// Error types for certsearch
//
// This module provides structured error types using thiserror so that callers
// can match exhaustively on failure modes instead of inspecting strings.

use std::io;
use thiserror::Error;

/// Main error type for certsearch operations
#[derive(Debug, Error)]
pub enum SearchError {
    /// Invalid search or data source configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// HTTP transport failure while performing the named operation
    #[error("{operation}: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP response carried an unexpected status code
    #[error("unexpected response status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Malformed checkpoint artifact
    #[error("malformed checkpoint: {message}")]
    Checkpoint { message: String },

    /// Malformed data tile or tile leaf
    #[error("invalid data tile: {message}")]
    Tile { message: String },

    /// Malformed tile path
    #[error("invalid tile path: {message}")]
    TilePath { message: String },

    /// Response body announced gzip but failed to decompress
    #[error("decompressing response body: {source}")]
    Gzip {
        #[source]
        source: io::Error,
    },

    /// A timestamp fell outside the time range covered by the log's entries
    #[error("timestamp doesn't fall within the time bounds of the log entries")]
    TimeOutOfRange,

    /// Retry budget exhausted without a successful attempt
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<SearchError>,
    },

    /// The operation was cancelled before it could complete
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid URL
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A failure wrapped with context describing the operation in progress
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<SearchError>,
    },
}

impl SearchError {
    /// Wrap this error with context describing the operation that failed.
    pub(crate) fn context(self, context: &'static str) -> SearchError {
        SearchError::Context {
            context,
            source: Box::new(self),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> SearchError {
        SearchError::Config {
            message: message.into(),
        }
    }
}
