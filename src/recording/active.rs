// src/recording/active.rs
//! Background recorder that never blocks the producer
//!
//! [`ActiveRecorder`] is the producer-facing handle. Every `store` call moves
//! the array into an unbounded channel and returns. A dedicated persister
//! thread ([`RecorderProcess`]) buffers what it receives and flushes it to
//! the container no sooner than `flush_interval` after the previous flush
//! completed.
//!
//! # Architecture
//!
//! ```text
//! Producer → store() → Channel (FIFO) → RecorderProcess
//!                                          ↓ push
//!                                       RecordBuffer
//!                                          ↓ deadline (FlushScheduler)
//!                                       drain + commit_batch
//!                                          ↓
//!                                       Container file
//! ```
//!
//! # Failures
//!
//! The persister runs in its own failure domain. Failures that lose data are
//! kept in a failure log, mark the recorder poisoned, and are returned from
//! [`ActiveRecorder::close`]:
//!
//! - items rejected at buffering time (shape or dtype disagreement)
//! - table batches rejected by the container (shape or dtype disagreement
//!   with the persisted table); the other tables of that flush still commit
//! - a failed final flush during shutdown
//! - a container that could not be prepared at startup
//!
//! A flush that fails because the container cannot be written at all keeps
//! the rows buffered and retries them at the next deadline; it is counted in
//! [`RecorderStats::failed_flushes`] but does not poison the recorder.

use crate::observability::metrics_names;
use crate::recording::array::NdArray;
use crate::recording::buffer::{RecordBuffer, WriteMode};
use crate::recording::channel::{self, ChannelMessage, MessageReceiver, MessageSender, QueueStats, Received};
use crate::recording::compressor::CompressionLevel;
use crate::recording::recorder::{flush_buffer, RecorderStats};
use crate::recording::scheduler::FlushScheduler;
use crate::storage::container::{ContainerEngine, SqliteContainer};
use crate::storage::dataset_store::{DatasetStore, OpenMode};
use crate::utils::config::RecorderConfig;
use crate::utils::errors::{RecorderError, Result};
use metrics::counter;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of the persister thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl ProcessState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProcessState::Starting,
            1 => ProcessState::Running,
            2 => ProcessState::Draining,
            _ => ProcessState::Stopped,
        }
    }
}

/// Data-losing failures seen by the persister
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    first: Option<RecorderError>,
    count: u64,
}

impl FailureLog {
    fn record(&mut self, error: RecorderError) {
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(error);
        }
    }

    pub fn first(&self) -> Option<&RecorderError> {
        self.first.as_ref()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// State visible to both the handle and the persister
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    poisoned: AtomicBool,
    stats: Mutex<RecorderStats>,
    failures: Mutex<FailureLog>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ProcessState::Starting as u8),
            poisoned: AtomicBool::new(false),
            stats: Mutex::new(RecorderStats::default()),
            failures: Mutex::new(FailureLog::default()),
        }
    }

    fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProcessState) {
        debug!("Recorder process {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    fn record_failure(&self, error: RecorderError) {
        error!("Recorder process failure: {}", error);
        self.poisoned.store(true, Ordering::Release);
        self.failures.lock().record(error);
    }
}

/// Persister side: owns the buffer, the store and the flush schedule
pub struct RecorderProcess<E: ContainerEngine = SqliteContainer> {
    store: DatasetStore<E>,
    open_mode: OpenMode,
    flush_interval: Duration,
    buffer: RecordBuffer,
    stats: RecorderStats,
    rx: MessageReceiver,
    shared: Arc<Shared>,
}

impl<E: ContainerEngine> RecorderProcess<E> {
    fn new(
        store: DatasetStore<E>,
        open_mode: OpenMode,
        flush_interval: Duration,
        rx: MessageReceiver,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            store,
            open_mode,
            flush_interval,
            buffer: RecordBuffer::new(),
            stats: RecorderStats::default(),
            rx,
            shared,
        }
    }

    /// Run until `Shutdown` (or until every sender is gone)
    pub fn run(mut self) {
        self.shared.set_state(ProcessState::Starting);

        if let Err(e) = self.store.ensure_writable(self.open_mode) {
            self.shared.record_failure(e);
            self.shared.set_state(ProcessState::Stopped);
            return;
        }

        let mut scheduler = match FlushScheduler::new(self.flush_interval, Instant::now()) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                self.shared.record_failure(e);
                self.shared.set_state(ProcessState::Stopped);
                return;
            }
        };

        self.shared.set_state(ProcessState::Running);

        loop {
            let wait = scheduler.remaining_wait(Instant::now());
            match self.rx.recv_timeout(wait) {
                Received::Message(ChannelMessage::Write { table, array, mode }) => {
                    self.buffer_item(&table, array, mode);
                }
                Received::Message(ChannelMessage::Shutdown) => break,
                Received::Timeout => {}
                Received::Disconnected => {
                    warn!("Recorder handle went away without shutdown; draining");
                    break;
                }
            }

            if scheduler.is_due(Instant::now()) {
                self.flush();
                scheduler.on_flush_completed(Instant::now());
            }
        }

        self.shared.set_state(ProcessState::Draining);
        self.drain_final();
        self.shared.set_state(ProcessState::Stopped);
    }

    fn buffer_item(&mut self, table: &str, array: NdArray, mode: WriteMode) {
        counter!(metrics_names::MESSAGES_TOTAL).increment(1);

        match self.buffer.push(table, array, mode) {
            Ok(()) => self.stats.items_buffered += 1,
            Err(e) => {
                self.stats.items_rejected += 1;
                self.shared.record_failure(e);
            }
        }
        self.publish_stats();
    }

    fn flush(&mut self) {
        match flush_buffer(&mut self.buffer, &self.store, &mut self.stats) {
            Ok(report) => {
                for (_, e) in report.failures {
                    self.shared.record_failure(e);
                }
            }
            Err(e @ RecorderError::Io(_)) => warn!(
                "Flush failed, {} rows retained for retry: {}",
                self.buffer.pending_rows(),
                e
            ),
            Err(e) => self.shared.record_failure(e),
        }
        self.publish_stats();
    }

    fn drain_final(&mut self) {
        match flush_buffer(&mut self.buffer, &self.store, &mut self.stats) {
            Ok(report) => {
                for (_, e) in report.failures {
                    self.shared.record_failure(e);
                }
            }
            Err(e) => {
                error!(
                    "Final flush failed; {} buffered rows are lost",
                    self.buffer.pending_rows()
                );
                self.buffer = RecordBuffer::new();
                self.shared.record_failure(e);
            }
        }
        self.publish_stats();
    }

    fn publish_stats(&self) {
        *self.shared.stats.lock() = self.stats;
    }
}

/// Producer-facing handle of the background recorder
///
/// `store`, `append` and `extend` never block on persistence. `close` must be
/// called on every path (it is also attempted on drop) so the persister
/// thread is never orphaned.
pub struct ActiveRecorder<E: ContainerEngine + Clone = SqliteContainer> {
    engine: E,
    path: PathBuf,
    flush_interval: Duration,
    open_mode: OpenMode,
    compression: CompressionLevel,
    sender: Option<MessageSender>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl ActiveRecorder<SqliteContainer> {
    /// Create a closed recorder for the container at `path`
    pub fn new<P: Into<PathBuf>>(path: P, flush_interval: Duration) -> Self {
        Self::with_engine(SqliteContainer::new(), path, flush_interval)
    }

    pub fn from_config(config: &RecorderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.path.clone(), config.flush_interval())
            .with_open_mode(config.open_mode)
            .with_compression(config.compression))
    }
}

impl<E: ContainerEngine + Clone> ActiveRecorder<E> {
    pub fn with_engine<P: Into<PathBuf>>(engine: E, path: P, flush_interval: Duration) -> Self {
        Self {
            engine,
            path: path.into(),
            flush_interval,
            open_mode: OpenMode::Truncate,
            compression: CompressionLevel::None,
            sender: None,
            worker: None,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn with_open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    pub fn with_compression(mut self, compression: CompressionLevel) -> Self {
        self.compression = compression;
        self
    }

    /// Start the persister thread
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(RecorderError::IllegalState(
                "Attempt to open an ActiveRecorder that is already open".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(RecorderError::Config(
                "flush_interval must be a positive duration".to_string(),
            ));
        }

        let (tx, rx) = channel::channel();
        let shared = Arc::new(Shared::new());
        let store = DatasetStore::with_engine(self.engine.clone(), self.path.clone())
            .with_compression(self.compression);
        let process = RecorderProcess::new(
            store,
            self.open_mode,
            self.flush_interval,
            rx,
            Arc::clone(&shared),
        );

        let worker = thread::Builder::new()
            .name("array-recorder".to_string())
            .spawn(move || process.run())
            .map_err(|e| RecorderError::Io(format!("Failed to start recorder thread: {}", e)))?;

        self.sender = Some(tx);
        self.worker = Some(worker);
        self.shared = shared;

        info!(
            "ActiveRecorder opened at {:?} (flush interval {:?})",
            self.path, self.flush_interval
        );
        Ok(())
    }

    /// Send `Shutdown`, wait for the persister to drain and stop
    ///
    /// Returns the first data-losing failure the persister recorded during
    /// this open/close cycle, if any.
    pub fn close(&mut self) -> Result<()> {
        let (Some(sender), Some(worker)) = (self.sender.take(), self.worker.take()) else {
            return Err(RecorderError::IllegalState(
                "Attempt to close an ActiveRecorder that is already closed".to_string(),
            ));
        };

        if sender.send(ChannelMessage::Shutdown).is_err() {
            debug!("Recorder process already stopped before shutdown");
        }
        drop(sender);

        if worker.join().is_err() {
            self.shared.record_failure(RecorderError::Io(
                "Recorder thread panicked".to_string(),
            ));
        }

        let failures = self.shared.failures.lock().clone();
        let stats = self.stats();
        info!(
            "ActiveRecorder closed at {:?}: {} rows in {} flushes, {} failures",
            self.path,
            stats.rows_committed,
            stats.flushes,
            failures.count()
        );

        match failures.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Enqueue `array` for `table` and return immediately
    pub fn store(&self, table: &str, array: NdArray, mode: WriteMode) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            RecorderError::IllegalState(
                "Attempt to store data to an ActiveRecorder that is closed".to_string(),
            )
        })?;

        if mode == WriteMode::Extend && array.is_scalar() {
            return Err(RecorderError::InvalidOperation(
                "Cannot extend with a zero-dimensional array".to_string(),
            ));
        }

        sender.send(ChannelMessage::Write {
            table: table.to_string(),
            array,
            mode,
        })
    }

    /// Enqueue one row
    pub fn append(&self, table: &str, array: NdArray) -> Result<()> {
        self.store(table, array, WriteMode::Stack)
    }

    /// Enqueue the rows along `array`'s leading dimension
    pub fn extend(&self, table: &str, array: NdArray) -> Result<()> {
        self.store(table, array, WriteMode::Extend)
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    /// Whether the persister has recorded a data-losing failure
    pub fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Snapshot of the persister's statistics
    pub fn stats(&self) -> RecorderStats {
        *self.shared.stats.lock()
    }

    pub fn failures(&self) -> FailureLog {
        self.shared.failures.lock().clone()
    }

    /// Channel depth and counters; `None` when closed
    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.sender.as_ref().map(MessageSender::stats)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

impl<E: ContainerEngine + Clone> Drop for ActiveRecorder<E> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                error!("Failed to close recorder on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::container::ContainerReader;
    use crate::storage::testing::{FlakyContainer, TimedContainer};
    use tempfile::tempdir;

    fn floats(n: usize, start: f64) -> NdArray {
        NdArray::from_vec(vec![n], (0..n).map(|i| start + i as f64).collect()).unwrap()
    }

    #[test]
    fn test_lifecycle_errors() {
        let dir = tempdir().unwrap();
        let mut recorder = ActiveRecorder::new(dir.path().join("a.db"), Duration::from_secs(2));

        assert!(matches!(
            recorder.extend("x", floats(1, 0.0)),
            Err(RecorderError::IllegalState(_))
        ));
        assert!(matches!(recorder.close(), Err(RecorderError::IllegalState(_))));

        recorder.open().unwrap();
        assert!(matches!(recorder.open(), Err(RecorderError::IllegalState(_))));
        recorder.close().unwrap();

        assert!(matches!(recorder.close(), Err(RecorderError::IllegalState(_))));
        assert!(matches!(
            recorder.append("x", floats(1, 0.0)),
            Err(RecorderError::IllegalState(_))
        ));
        assert_eq!(recorder.state(), ProcessState::Stopped);
    }

    #[test]
    fn test_zero_interval_rejected_at_open() {
        let dir = tempdir().unwrap();
        let mut recorder = ActiveRecorder::new(dir.path().join("a.db"), Duration::ZERO);
        assert!(matches!(recorder.open(), Err(RecorderError::Config(_))));
        assert!(!recorder.is_open());
    }

    #[test]
    fn test_scalar_extend_rejected_synchronously() {
        let dir = tempdir().unwrap();
        let mut recorder = ActiveRecorder::new(dir.path().join("a.db"), Duration::from_secs(2));
        recorder.open().unwrap();

        assert!(matches!(
            recorder.extend("s", NdArray::scalar(1.0f64)),
            Err(RecorderError::InvalidOperation(_))
        ));
        recorder.append("s", NdArray::scalar(1.0f64)).unwrap();
        recorder.close().unwrap();

        let reader = ContainerReader::open(dir.path().join("a.db")).unwrap();
        assert_eq!(reader.table_len("s").unwrap(), Some(1));
    }

    #[test]
    fn test_periodic_flush_visible_before_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut recorder = ActiveRecorder::new(&path, Duration::from_millis(50));
        recorder.open().unwrap();

        recorder.extend("x", floats(4, 0.0)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut persisted = None;
        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
            if let Ok(reader) = ContainerReader::open(&path) {
                persisted = reader.table_len("x").ok().flatten();
                if persisted.is_some() {
                    break;
                }
            }
        }

        assert_eq!(persisted, Some(4));
        assert_eq!(recorder.state(), ProcessState::Running);
        recorder.close().unwrap();
    }

    #[test]
    fn test_flush_gap_respects_interval() {
        let dir = tempdir().unwrap();
        let interval = Duration::from_millis(150);
        let engine = TimedContainer::default();
        let mut recorder =
            ActiveRecorder::with_engine(engine.clone(), dir.path().join("a.db"), interval);

        recorder.open().unwrap();
        for i in 0..400 {
            recorder.extend("x", floats(1, i as f64)).unwrap();
            thread::sleep(Duration::from_millis(2));
        }
        recorder.close().unwrap();

        let stats = recorder.stats();
        assert_eq!(stats.rows_committed, 400);

        let opens = engine.opens();
        assert_eq!(opens.len() as u64, stats.flushes);
        assert!(opens.len() >= 3, "only {} flushes", opens.len());

        // Every periodic flush starts at least `interval` after the previous
        // one completed; only the final drain may come sooner
        for pair in opens[..opens.len() - 1].windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= interval, "flushes {:?} apart", gap);
        }
    }

    #[test]
    fn test_shape_mismatch_reported_at_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut recorder = ActiveRecorder::new(&path, Duration::from_millis(20));
        recorder.open().unwrap();

        recorder.extend("x", floats(10, 0.0)).unwrap();
        let wide = NdArray::from_vec(vec![10, 2], vec![0.0f64; 20]).unwrap();
        recorder.extend("x", wide).unwrap();

        assert!(matches!(
            recorder.close(),
            Err(RecorderError::ShapeMismatch { .. })
        ));
        assert!(recorder.is_poisoned());

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.table_len("x").unwrap(), Some(10));
    }

    #[test]
    fn test_transient_io_failure_is_retried() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        let engine = FlakyContainer::failing_opens(1);
        let mut recorder =
            ActiveRecorder::with_engine(engine.clone(), &path, Duration::from_millis(30));
        recorder.open().unwrap();

        recorder.extend("x", floats(3, 0.0)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.failures_left() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        recorder.extend("x", floats(2, 3.0)).unwrap();

        recorder.close().unwrap();
        assert!(!recorder.is_poisoned());
        assert_eq!(recorder.stats().failed_flushes, 1);

        let table = ContainerReader::open(&path).unwrap().read_table("x").unwrap();
        assert_eq!(table.to_vec::<f64>().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_failed_final_flush_reported() {
        let dir = tempdir().unwrap();
        let engine = FlakyContainer::failing_opens(usize::MAX);
        let mut recorder =
            ActiveRecorder::with_engine(engine, dir.path().join("a.db"), Duration::from_secs(60));
        recorder.open().unwrap();
        recorder.extend("x", floats(3, 0.0)).unwrap();

        assert!(matches!(recorder.close(), Err(RecorderError::Io(_))));
        assert!(recorder.is_poisoned());
    }

    #[test]
    fn test_unwritable_path_reported_at_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("a.db");
        let mut recorder = ActiveRecorder::new(path, Duration::from_secs(1));
        recorder.open().unwrap();

        // The persister may already be gone; either way nothing is written
        let _ = recorder.extend("x", floats(1, 0.0));
        assert!(matches!(recorder.close(), Err(RecorderError::Io(_))));
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        let mut recorder = ActiveRecorder::new(&path, Duration::from_secs(1));

        recorder.open().unwrap();
        recorder.extend("x", floats(3, 0.0)).unwrap();
        recorder.close().unwrap();

        let mut recorder = recorder.with_open_mode(OpenMode::Append);
        recorder.open().unwrap();
        recorder.extend("x", floats(2, 3.0)).unwrap();
        recorder.close().unwrap();

        let table = ContainerReader::open(&path).unwrap().read_table("x").unwrap();
        assert_eq!(table.to_vec::<f64>().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_dropped_sender_drains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        let (tx, rx) = channel::channel();
        let shared = Arc::new(Shared::new());
        let process = RecorderProcess::new(
            DatasetStore::new(&path),
            OpenMode::Truncate,
            Duration::from_secs(60),
            rx,
            Arc::clone(&shared),
        );
        let worker = thread::spawn(move || process.run());

        tx.send(ChannelMessage::Write {
            table: "x".to_string(),
            array: floats(2, 0.0),
            mode: WriteMode::Extend,
        })
        .unwrap();
        drop(tx);
        worker.join().unwrap();

        assert_eq!(shared.state(), ProcessState::Stopped);
        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.table_len("x").unwrap(), Some(2));
    }

    #[test]
    fn test_queue_stats() {
        let dir = tempdir().unwrap();
        let mut recorder = ActiveRecorder::new(dir.path().join("a.db"), Duration::from_secs(1));
        assert!(recorder.queue_stats().is_none());

        recorder.open().unwrap();
        recorder.append("y", NdArray::scalar(1u8)).unwrap();
        recorder.append("y", NdArray::scalar(2u8)).unwrap();
        assert_eq!(recorder.queue_stats().unwrap().sent, 2);
        recorder.close().unwrap();
    }
}
