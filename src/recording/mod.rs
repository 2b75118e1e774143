// src/recording/mod.rs
//! Array recording
//!
//! This module turns a stream of arrays into append-only tables:
//!
//! - **Array**: typed n-dimensional values (`NdArray`, `DType`)
//! - **Buffer**: per-table accumulation between flushes
//! - **Scheduler**: minimum gap between flushes
//! - **Channel**: FIFO hand-off from producer to persister
//! - **Compressor**: zstd chunk compression
//! - **Active**: background recorder (`ActiveRecorder`)
//! - **Recorder**: synchronous recorder that flushes on demand
//!
//! # Architecture
//!
//! ```text
//! Producer → store() → Channel → RecorderProcess
//!                                     ↓
//!                              RecordBuffer (per table)
//!                                     ↓ every flush_interval
//!                              DatasetStore::commit_batch
//!                                     ↓
//!                              Container (growable tables)
//! ```

pub mod active;
pub mod array;
pub mod buffer;
pub mod channel;
pub mod compressor;
pub mod recorder;
pub mod scheduler;

pub use active::{ActiveRecorder, FailureLog, ProcessState, RecorderProcess};
pub use array::{DType, Element, Field, NdArray, Scalar};
pub use buffer::{DrainedBatch, RecordBuffer, WriteMode};
pub use channel::QueueStats;
pub use compressor::{Codec, CompressionLevel, Compressor};
pub use recorder::{Recorder, RecorderStats};
pub use scheduler::FlushScheduler;
