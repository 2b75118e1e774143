// src/storage/dataset_store.rs
//! Growable-table persistence
//!
//! Commits drained batches to the container: create-or-grow each table, then
//! write the new rows into the freshly reserved slice. All tables of one
//! drain share a single open/close window of the container file.

use crate::recording::buffer::DrainedBatch;
use crate::recording::compressor::CompressionLevel;
use crate::storage::container::{ContainerEngine, ContainerSession, SqliteContainer};
use crate::utils::errors::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to do with an existing container at open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Start from an empty container
    #[default]
    Truncate,

    /// Keep existing tables and grow them
    Append,
}

/// Outcome of one [`DatasetStore::commit_batch`] call
#[derive(Debug, Default)]
pub struct CommitReport {
    /// `(table, rows written)` in commit order
    pub committed: Vec<(String, usize)>,

    /// Tables whose rows were rejected; their persisted rows are untouched
    pub failures: Vec<(String, RecorderError)>,
}

impl CommitReport {
    pub fn rows(&self) -> usize {
        self.committed.iter().map(|(_, rows)| rows).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// First per-table failure, if any
    pub fn first_failure(&self) -> Option<&RecorderError> {
        self.failures.first().map(|(_, e)| e)
    }
}

/// Table persistence against a container engine
#[derive(Debug)]
pub struct DatasetStore<E: ContainerEngine = SqliteContainer> {
    engine: E,
    path: PathBuf,
    compression: CompressionLevel,
}

impl DatasetStore<SqliteContainer> {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_engine(SqliteContainer::new(), path)
    }
}

impl<E: ContainerEngine> DatasetStore<E> {
    pub fn with_engine<P: Into<PathBuf>>(engine: E, path: P) -> Self {
        Self {
            engine,
            path: path.into(),
            compression: CompressionLevel::None,
        }
    }

    /// Compression applied to tables created from now on
    pub fn with_compression(mut self, compression: CompressionLevel) -> Self {
        self.set_compression(compression);
        self
    }

    pub fn set_compression(&mut self, compression: CompressionLevel) {
        self.compression = compression;
    }

    pub fn compression(&self) -> CompressionLevel {
        self.compression
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare the container at open time; it is left closed afterwards
    pub fn ensure_writable(&self, mode: OpenMode) -> Result<()> {
        match mode {
            OpenMode::Append if self.path.exists() => {
                self.engine.validate(&self.path)?;
                info!("Appending to existing container {:?}", self.path);
                Ok(())
            }
            _ => self.engine.create(&self.path),
        }
    }

    /// Persist every drained batch within one open/close of the container
    ///
    /// Shape and dtype disagreements are reported per table in the returned
    /// [`CommitReport`] while the other tables still commit. Any other
    /// failure aborts the whole call, leaving the container as it was.
    pub fn commit_batch(&self, batches: &[DrainedBatch]) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        if batches.is_empty() {
            return Ok(report);
        }

        let start = Instant::now();
        let mut session = self.engine.open_read_write(&self.path)?;

        for batch in batches {
            session.begin_table_write(&batch.table)?;

            match self.write_table(&mut session, batch) {
                Ok(rows) => {
                    session.commit_table_write(&batch.table)?;
                    report.committed.push((batch.table.clone(), rows));
                }
                Err(e) if e.is_table_local() => {
                    session.abort_table_write(&batch.table)?;
                    warn!("Rejected {} rows for table '{}': {}", batch.rows(), batch.table, e);
                    report.failures.push((batch.table.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }

        session.close()?;

        debug!(
            "Committed {} rows across {} tables in {:?}",
            report.rows(),
            report.committed.len(),
            start.elapsed()
        );

        Ok(report)
    }

    fn write_table(&self, session: &mut E::Session, batch: &DrainedBatch) -> Result<usize> {
        let array = &batch.array;
        let rows = array.len().ok_or_else(|| {
            RecorderError::InvalidOperation(format!(
                "Batch for table '{}' has no leading dimension",
                batch.table
            ))
        })?;

        let start = match session.table_info(&batch.table)? {
            None => {
                session.create_table(
                    &batch.table,
                    rows,
                    array.row_shape(),
                    array.dtype(),
                    self.compression,
                )?;
                0
            }
            Some(info) => {
                if &info.dtype != array.dtype() {
                    return Err(RecorderError::DtypeMismatch {
                        table: batch.table.clone(),
                        expected: info.dtype.to_string(),
                        found: array.dtype().to_string(),
                    });
                }
                if info.trailing_shape.as_slice() != array.row_shape() {
                    return Err(RecorderError::ShapeMismatch {
                        table: batch.table.clone(),
                        expected: info.trailing_shape,
                        found: array.row_shape().to_vec(),
                    });
                }

                session.resize_leading_dim(&batch.table, info.len + rows)?;
                info.len
            }
        };

        session.write_rows(&batch.table, start, array)?;
        Ok(rows)
    }
}
