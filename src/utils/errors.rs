// src/utils/errors.rs
//! Error types for the recorder
//!
//! All fallible operations return [`Result`]. Errors are `Clone` so the
//! background persister can hand them back to the producer at `close()`.

use thiserror::Error;

/// Recorder errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    /// Lifecycle misuse (double open, store after close, double close)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Combined batch disagrees with the table's trailing shape
    #[error("Shape mismatch for table '{table}': expected trailing shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        table: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Combined batch disagrees with the table's element type
    #[error("Dtype mismatch for table '{table}': expected {expected}, found {found}")]
    DtypeMismatch {
        table: String,
        expected: String,
        found: String,
    },

    /// Container create/open/resize/write failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation not valid for the supplied data
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RecorderError {
    /// Whether the error is tied to a single table's contents rather than the
    /// container as a whole
    pub fn is_table_local(&self) -> bool {
        matches!(
            self,
            RecorderError::ShapeMismatch { .. }
                | RecorderError::DtypeMismatch { .. }
                | RecorderError::InvalidOperation(_)
                | RecorderError::Compression(_)
        )
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(e: std::io::Error) -> Self {
        RecorderError::Io(e.to_string())
    }
}

impl From<config::ConfigError> for RecorderError {
    fn from(e: config::ConfigError) -> Self {
        RecorderError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
