// src/lib.rs
//! Array Recorder Library
//!
//! Records a stream of n-dimensional arrays, keyed by table name, into a
//! single container file of append-only growable tables without blocking
//! the producer.
//!
//! # Architecture
//!
//! - **recording**: arrays, buffering, flush scheduling and the recorders
//! - **storage**: the container engine and growable-table persistence
//! - **observability**: tracing and metrics setup
//! - **utils**: errors and configuration
//!
//! # Example
//!
//! ```no_run
//! use array_recorder::{ActiveRecorder, NdArray};
//! use std::time::Duration;
//!
//! let mut recorder = ActiveRecorder::new("run.db", Duration::from_secs(2));
//! recorder.open()?;
//! recorder.extend("x", NdArray::from_vec(vec![3], vec![1.0f64, 2.0, 3.0])?)?;
//! recorder.append("y", NdArray::scalar(7u8))?;
//! recorder.close()?;
//! # Ok::<(), array_recorder::RecorderError>(())
//! ```

pub mod observability;
pub mod recording;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use recording::active::ActiveRecorder;
pub use recording::array::{DType, Field, NdArray, Scalar};
pub use recording::buffer::WriteMode;
pub use recording::compressor::CompressionLevel;
pub use recording::recorder::{Recorder, RecorderStats};
pub use storage::container::ContainerReader;
pub use storage::dataset_store::OpenMode;
pub use utils::config::RecorderConfig;
pub use utils::errors::{RecorderError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
