//! Error types for io-exporter
//!
//! Probe-level errors never leave the probe boundary: they collapse to a
//! failed [`ProbeResult`](crate::ProbeResult) and are only kept for local
//! diagnostic logging. Configuration errors are the one fatal class.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Common result type for io-exporter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for io-exporter
#[derive(Debug, Error)]
pub enum Error {
    // Probe errors
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed on {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed on {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("short read: expected {expected} bytes, read {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("failed to close {path}: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    #[error("read block differs from written block")]
    ContentMismatch,

    #[error("buffer of {len} bytes is not aligned to {alignment}")]
    Alignment { len: usize, alignment: usize },

    // Setup errors
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short, stable name of the error kind, used as a log field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::ShortWrite { .. } => "short_write",
            Self::ShortRead { .. } => "short_read",
            Self::Close { .. } => "close",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::ContentMismatch => "content_mismatch",
            Self::Alignment { .. } => "alignment",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::Internal(_) => "internal",
        }
    }

    /// Soft errors are logged but never change a probe's classification
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Fatal errors terminate the process before the probe loop starts
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_))
    }
}
