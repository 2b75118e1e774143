// src/recording/recorder.rs
//! Synchronous recorder
//!
//! Buffers data in memory until [`Recorder::flush`] is called. Suited to
//! low-rate, single-threaded use where a slow flush is acceptable; for
//! producers that must never stall, use
//! [`ActiveRecorder`](crate::recording::active::ActiveRecorder).
//!
//! The container is only open for the duration of a flush, so another
//! process can open a consistent snapshot of partially written data.

use crate::observability::metrics_names;
use crate::recording::array::NdArray;
use crate::recording::buffer::{RecordBuffer, WriteMode};
use crate::recording::compressor::CompressionLevel;
use crate::storage::container::{ContainerEngine, SqliteContainer};
use crate::storage::dataset_store::{CommitReport, DatasetStore, OpenMode};
use crate::utils::config::RecorderConfig;
use crate::utils::errors::{RecorderError, Result};
use metrics::{counter, histogram};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Recorder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Items accepted into the buffer
    pub items_buffered: u64,

    /// Items rejected at buffering time (shape, dtype, scalar extend)
    pub items_rejected: u64,

    /// Flushes that reached the container
    pub flushes: u64,

    /// Flushes that failed at the container level
    pub failed_flushes: u64,

    /// Rows durably written
    pub rows_committed: u64,

    /// Per-table batches rejected during a flush
    pub batches_rejected: u64,

    pub total_flush_time_ms: u64,
}

impl RecorderStats {
    pub fn avg_flush_time_ms(&self) -> u64 {
        if self.flushes == 0 {
            0
        } else {
            self.total_flush_time_ms / self.flushes
        }
    }
}

/// Drain `buffer` into `store` once
///
/// Nothing pending returns an empty report without opening the container. If
/// the container cannot be written at all, the drained rows are put back
/// into the buffer and the error is returned.
pub(crate) fn flush_buffer<E: ContainerEngine>(
    buffer: &mut RecordBuffer,
    store: &DatasetStore<E>,
    stats: &mut RecorderStats,
) -> Result<CommitReport> {
    let drain = buffer.drain();
    if drain.is_empty() {
        return Ok(CommitReport::default());
    }

    let start = Instant::now();
    let pending_rows = drain.rows();
    debug!(
        "Flushing {} rows across {} tables",
        pending_rows,
        drain.batches.len()
    );

    match store.commit_batch(&drain.batches) {
        Ok(mut report) => {
            report.failures.extend(drain.rejected);

            let elapsed = start.elapsed();
            stats.flushes += 1;
            stats.rows_committed += report.rows() as u64;
            stats.batches_rejected += report.failures.len() as u64;
            stats.total_flush_time_ms += elapsed.as_millis() as u64;

            counter!(metrics_names::FLUSHES_TOTAL).increment(1);
            histogram!(metrics_names::FLUSH_DURATION_SECONDS).record(elapsed.as_secs_f64());
            for (table, rows) in &report.committed {
                counter!(metrics_names::ROWS_COMMITTED_TOTAL, "table" => table.clone())
                    .increment(*rows as u64);
            }
            if !report.failures.is_empty() {
                counter!(metrics_names::FLUSH_FAILURES_TOTAL)
                    .increment(report.failures.len() as u64);
            }

            debug!("Flush committed {} rows in {:?}", report.rows(), elapsed);
            Ok(report)
        }
        Err(e) => {
            stats.failed_flushes += 1;
            counter!(metrics_names::FLUSH_FAILURES_TOTAL).increment(1);
            warn!("Flush of {} rows failed, keeping them buffered: {}", pending_rows, e);

            buffer.restore(drain.batches)?;
            Err(e)
        }
    }
}

/// Synchronous recorder; data is written only inside [`Recorder::flush`]
pub struct Recorder<E: ContainerEngine = SqliteContainer> {
    store: DatasetStore<E>,
    open_mode: OpenMode,
    buffer: RecordBuffer,
    is_open: bool,
    stats: RecorderStats,
}

impl Recorder<SqliteContainer> {
    /// Create a closed recorder for the container at `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_engine(SqliteContainer::new(), path)
    }

    pub fn from_config(config: &RecorderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.path.clone())
            .with_open_mode(config.open_mode)
            .with_compression(config.compression))
    }
}

impl<E: ContainerEngine> Recorder<E> {
    pub fn with_engine<P: Into<PathBuf>>(engine: E, path: P) -> Self {
        Self {
            store: DatasetStore::with_engine(engine, path),
            open_mode: OpenMode::Truncate,
            buffer: RecordBuffer::new(),
            is_open: false,
            stats: RecorderStats::default(),
        }
    }

    pub fn with_open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    pub fn with_compression(mut self, compression: CompressionLevel) -> Self {
        self.store.set_compression(compression);
        self
    }

    /// Prepare the container; truncates it unless opened in append mode
    pub fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Err(RecorderError::IllegalState(
                "Attempt to open a Recorder that is already open".to_string(),
            ));
        }

        self.store.ensure_writable(self.open_mode)?;
        self.is_open = true;

        info!("Recorder opened at {:?}", self.store.path());
        Ok(())
    }

    /// Flush and close; the recorder is closed even if the final flush fails
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(RecorderError::IllegalState(
                "Attempt to close a Recorder that is already closed".to_string(),
            ));
        }

        let result = self.flush();
        self.is_open = false;

        if !self.buffer.is_empty() {
            error!(
                "Recorder closed with {} rows that could not be written",
                self.buffer.pending_rows()
            );
            self.buffer = RecordBuffer::new();
        }

        info!("Recorder closed at {:?}", self.store.path());
        result
    }

    /// Buffer `array` for `table`, to be written at the next flush
    pub fn store(&mut self, table: &str, array: NdArray, mode: WriteMode) -> Result<()> {
        if !self.is_open {
            return Err(RecorderError::IllegalState(
                "Attempt to store data to a Recorder that is closed".to_string(),
            ));
        }

        match self.buffer.push(table, array, mode) {
            Ok(()) => {
                self.stats.items_buffered += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.items_rejected += 1;
                Err(e)
            }
        }
    }

    /// Buffer one row
    pub fn append(&mut self, table: &str, array: NdArray) -> Result<()> {
        self.store(table, array, WriteMode::Stack)
    }

    /// Buffer the rows along `array`'s leading dimension
    pub fn extend(&mut self, table: &str, array: NdArray) -> Result<()> {
        self.store(table, array, WriteMode::Extend)
    }

    /// Write everything buffered to the container
    ///
    /// May take a considerable time when a lot of data is buffered. Returns
    /// the first per-table failure after the other tables have committed.
    pub fn flush(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(RecorderError::IllegalState(
                "Attempt to flush a Recorder that is closed".to_string(),
            ));
        }

        let report = flush_buffer(&mut self.buffer, &self.store, &mut self.stats)?;
        let first = report.failures.into_iter().next();
        match first {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    pub fn pending_rows(&self) -> usize {
        self.buffer.pending_rows()
    }

    pub fn path(&self) -> &std::path::Path {
        self.store.path()
    }
}

impl<E: ContainerEngine> Drop for Recorder<E> {
    fn drop(&mut self) {
        if self.is_open {
            if let Err(e) = self.close() {
                error!("Failed to close recorder on drop: {}", e);
            }
        }
    }
}
