// src/recording/buffer.rs
//! In-memory accumulation of pending writes
//!
//! Items are grouped per table in arrival order. Within one drain cycle every
//! item of a table must agree on dtype and row shape, so combining a batch
//! into one array never fails for well-formed input.

use crate::recording::array::{DType, NdArray};
use crate::utils::errors::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{trace, warn};

/// How a buffered array maps onto table rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// The array is one row; it gains a leading dimension of 1
    Stack,

    /// The array's leading dimension holds the rows to append
    #[default]
    Extend,
}

impl WriteMode {
    /// Shape of one table row produced by `array` under this mode
    pub fn row_shape<'a>(&self, array: &'a NdArray) -> Result<&'a [usize]> {
        match self {
            WriteMode::Stack => Ok(array.shape()),
            WriteMode::Extend if array.is_scalar() => Err(RecorderError::InvalidOperation(
                "Cannot extend with a zero-dimensional array".to_string(),
            )),
            WriteMode::Extend => Ok(array.row_shape()),
        }
    }

    /// Number of table rows produced by `array` under this mode
    pub fn rows(&self, array: &NdArray) -> usize {
        match self {
            WriteMode::Stack => 1,
            WriteMode::Extend => array.len().unwrap_or(0),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Stack => write!(f, "stack"),
            WriteMode::Extend => write!(f, "extend"),
        }
    }
}

impl FromStr for WriteMode {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stack" => Ok(WriteMode::Stack),
            "extend" => Ok(WriteMode::Extend),
            other => Err(RecorderError::InvalidOperation(format!(
                "Unknown write mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug)]
struct PendingItem {
    array: NdArray,
    mode: WriteMode,
}

/// Items queued for one table since the last flush
#[derive(Debug)]
pub struct PendingBatch {
    table: String,
    dtype: DType,
    row_shape: Vec<usize>,
    items: Vec<PendingItem>,
    rows: usize,
}

impl PendingBatch {
    fn new(table: String, dtype: DType, row_shape: Vec<usize>) -> Self {
        Self {
            table,
            dtype,
            row_shape,
            items: Vec::new(),
            rows: 0,
        }
    }

    fn check(&self, array: &NdArray, row_shape: &[usize]) -> Result<()> {
        if array.dtype() != &self.dtype {
            return Err(RecorderError::DtypeMismatch {
                table: self.table.clone(),
                expected: self.dtype.to_string(),
                found: array.dtype().to_string(),
            });
        }
        if row_shape != self.row_shape.as_slice() {
            return Err(RecorderError::ShapeMismatch {
                table: self.table.clone(),
                expected: self.row_shape.clone(),
                found: row_shape.to_vec(),
            });
        }
        Ok(())
    }

    fn add(&mut self, array: NdArray, mode: WriteMode) {
        self.rows += mode.rows(&array);
        self.items.push(PendingItem { array, mode });
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Normalize every item to extend-shape and concatenate in arrival order
    fn combine(self) -> Result<NdArray> {
        let parts = self
            .items
            .into_iter()
            .map(|item| match item.mode {
                WriteMode::Stack => item.array.stacked(),
                WriteMode::Extend => item.array,
            })
            .collect();
        NdArray::concatenate(parts)
    }
}

/// Combined, ready-to-write rows for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainedBatch {
    pub table: String,
    pub array: NdArray,
}

impl DrainedBatch {
    pub fn rows(&self) -> usize {
        self.array.len().unwrap_or(0)
    }
}

/// Result of [`RecordBuffer::drain`]
#[derive(Debug, Default)]
pub struct Drain {
    /// Combined arrays, in order of each table's first push
    pub batches: Vec<DrainedBatch>,

    /// Tables whose items could not be combined; their items are discarded
    pub rejected: Vec<(String, RecorderError)>,
}

impl Drain {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.rejected.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.batches.iter().map(DrainedBatch::rows).sum()
    }
}

/// Pending writes keyed by table name
#[derive(Debug, Default)]
pub struct RecordBuffer {
    batches: Vec<PendingBatch>,
    index: HashMap<String, usize>,
    bytes: usize,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `array` for `table`
    ///
    /// Fails without side effects if the item disagrees with the table's
    /// earlier pending items, or if it is a scalar pushed in extend mode.
    pub fn push(&mut self, table: &str, array: NdArray, mode: WriteMode) -> Result<()> {
        let row_shape = mode.row_shape(&array)?.to_vec();

        let slot = match self.index.get(table) {
            Some(&slot) => {
                self.batches[slot].check(&array, &row_shape)?;
                slot
            }
            None => {
                let slot = self.batches.len();
                self.batches.push(PendingBatch::new(
                    table.to_string(),
                    array.dtype().clone(),
                    row_shape,
                ));
                self.index.insert(table.to_string(), slot);
                slot
            }
        };

        trace!("Buffered {:?} ({}) for table '{}'", array.shape(), mode, table);
        self.bytes += array.nbytes();
        self.batches[slot].add(array, mode);
        Ok(())
    }

    /// Combine every table's pending items and empty the buffer
    ///
    /// Nothing pending returns an empty [`Drain`] and touches nothing.
    pub fn drain(&mut self) -> Drain {
        if self.batches.is_empty() {
            return Drain::default();
        }

        self.index.clear();
        self.bytes = 0;

        let mut drain = Drain::default();
        for batch in std::mem::take(&mut self.batches) {
            let table = batch.table.clone();
            match batch.combine() {
                Ok(array) => drain.batches.push(DrainedBatch { table, array }),
                Err(e) => {
                    warn!("Discarding pending rows for table '{}': {}", table, e);
                    drain.rejected.push((table, e));
                }
            }
        }

        drain
    }

    /// Put drained batches back after a failed commit
    ///
    /// Only valid on an empty buffer, i.e. before anything newer is pushed,
    /// so the restored rows keep their place at the head of each table.
    pub fn restore(&mut self, drained: Vec<DrainedBatch>) -> Result<()> {
        if !self.is_empty() {
            return Err(RecorderError::IllegalState(format!(
                "Cannot restore into a buffer holding {} pending items",
                self.pending_items()
            )));
        }

        for batch in drained {
            self.push(&batch.table, batch.array, WriteMode::Extend)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Table names with pending items, in first-push order
    pub fn pending_tables(&self) -> Vec<&str> {
        self.batches.iter().map(PendingBatch::table).collect()
    }

    pub fn pending_items(&self) -> usize {
        self.batches.iter().map(PendingBatch::len).sum()
    }

    pub fn pending_rows(&self) -> usize {
        self.batches.iter().map(PendingBatch::rows).sum()
    }

    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }
}
