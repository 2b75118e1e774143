// src/storage/testing.rs
//! Test engines for exercising failure paths

use crate::storage::container::{ContainerEngine, SqliteContainer, SqliteSession};
use crate::utils::errors::{RecorderError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// SQLite engine whose next `n` read/write opens fail with an I/O error
#[derive(Debug, Clone, Default)]
pub struct FlakyContainer {
    inner: SqliteContainer,
    failures_left: Arc<AtomicUsize>,
}

impl FlakyContainer {
    pub fn failing_opens(n: usize) -> Self {
        Self {
            inner: SqliteContainer::new(),
            failures_left: Arc::new(AtomicUsize::new(n)),
        }
    }

    pub fn failures_left(&self) -> usize {
        self.failures_left.load(Ordering::SeqCst)
    }
}

impl ContainerEngine for FlakyContainer {
    type Session = SqliteSession;

    fn create(&self, path: &Path) -> Result<()> {
        self.inner.create(path)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        self.inner.validate(path)
    }

    fn open_read_write(&self, path: &Path) -> Result<SqliteSession> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(RecorderError::Io("simulated disk failure".to_string()));
        }
        self.inner.open_read_write(path)
    }
}

/// SQLite engine that timestamps every read/write open
#[derive(Debug, Clone, Default)]
pub struct TimedContainer {
    inner: SqliteContainer,
    opens: Arc<Mutex<Vec<Instant>>>,
}

impl TimedContainer {
    /// One entry per flush that reached the container
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }
}

impl ContainerEngine for TimedContainer {
    type Session = SqliteSession;

    fn create(&self, path: &Path) -> Result<()> {
        self.inner.create(path)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        self.inner.validate(path)
    }

    fn open_read_write(&self, path: &Path) -> Result<SqliteSession> {
        self.opens.lock().push(Instant::now());
        self.inner.open_read_write(path)
    }
}
