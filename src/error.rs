//! Error types for kumo
//!
//! Errors are split by layer:
//! - [`Error`] - crate-level errors returned from setup and orchestration
//! - [`NntpError`] - wire protocol, transport and yEnc failures, shared with
//!   `nntp_rs` so its codec and decoder errors flow through unchanged
//!
//! Only setup failures (no session could authenticate, directories cannot be
//! created, the catalog cannot be parsed) surface to callers. Per-fragment
//! failures are absorbed by the pipeline stages and show up as breakage.

use std::path::PathBuf;
use thiserror::Error;

pub use nntp_rs::NntpError;

/// Result type alias for kumo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kumo
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "connections")
        key: Option<String>,
    },

    /// Invalid NZB catalog
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// NNTP protocol or connection error
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    /// Not a single session of the pool could connect and authenticate
    #[error("no connections available: {attempted} attempted, last error: {last_error}")]
    NoSessions {
        /// Number of sessions that were attempted
        attempted: usize,
        /// The last connect/authenticate failure observed
        last_error: String,
    },

    /// Directory required by the run could not be created
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        /// The directory that could not be created
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run was cancelled before all fragments resolved
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
