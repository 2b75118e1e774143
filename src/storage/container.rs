// src/storage/container.rs
//! Container file engine
//!
//! A container holds named growable tables. Each table has a fixed dtype and
//! trailing shape and an unbounded leading dimension. The engine is consumed
//! through [`ContainerEngine`] / [`ContainerSession`]; [`SqliteContainer`] is
//! the bundled implementation.
//!
//! # Layout
//!
//! ```text
//! container_meta(key, value)                       format marker + version
//! datasets(name, dtype, trailing_shape, row_bytes, length, compression, created_at)
//! chunks(dataset, start_row, row_count, codec, payload)
//! ```
//!
//! Every `write_rows` call stores one chunk. Rows reserved by a resize but
//! never written read back as zeros.

use crate::recording::array::{DType, NdArray};
use crate::recording::compressor::{Codec, CompressionLevel, Compressor};
use crate::utils::errors::{RecorderError, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const FORMAT_MARKER: &str = "array-recorder";
const FORMAT_VERSION: &str = "1";

/// How long a connection waits on another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE container_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE datasets (
        name TEXT PRIMARY KEY,
        dtype TEXT NOT NULL,
        trailing_shape TEXT NOT NULL,
        row_bytes INTEGER NOT NULL,
        length INTEGER NOT NULL,
        compression INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE chunks (
        dataset TEXT NOT NULL REFERENCES datasets(name),
        start_row INTEGER NOT NULL,
        row_count INTEGER NOT NULL,
        codec INTEGER NOT NULL,
        payload BLOB NOT NULL,
        PRIMARY KEY (dataset, start_row)
    );
"#;

/// Catalog entry of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub dtype: DType,
    pub trailing_shape: Vec<usize>,
    pub len: usize,
    pub compression: CompressionLevel,
    pub created_at: i64,
}

impl TableInfo {
    pub fn row_bytes(&self) -> usize {
        self.dtype.itemsize() * self.trailing_shape.iter().product::<usize>()
    }

    /// Full shape: `[len] + trailing_shape`
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.trailing_shape.len() + 1);
        shape.push(self.len);
        shape.extend_from_slice(&self.trailing_shape);
        shape
    }
}

/// Container file capability
pub trait ContainerEngine: Send + 'static {
    type Session: ContainerSession;

    /// Create an empty container, truncating any existing file
    fn create(&self, path: &Path) -> Result<()>;

    /// Check that an existing file is a container this engine can append to
    fn validate(&self, path: &Path) -> Result<()>;

    /// Open an existing container for read/write
    fn open_read_write(&self, path: &Path) -> Result<Self::Session>;
}

/// Scoped read/write access to an open container
///
/// Changes become durable at [`ContainerSession::close`]; dropping a session
/// without closing it discards them.
pub trait ContainerSession {
    fn table_exists(&self, name: &str) -> Result<bool>;

    fn table_info(&self, name: &str) -> Result<Option<TableInfo>>;

    /// Create a table with `initial_rows` reserved rows and an unbounded
    /// leading dimension
    fn create_table(
        &mut self,
        name: &str,
        initial_rows: usize,
        trailing_shape: &[usize],
        dtype: &DType,
        compression: CompressionLevel,
    ) -> Result<TableInfo>;

    /// Grow the leading dimension; shrinking is rejected
    fn resize_leading_dim(&mut self, name: &str, new_size: usize) -> Result<()>;

    /// Write `rows` into reserved, never-written rows starting at `start`
    fn write_rows(&mut self, name: &str, start: usize, rows: &NdArray) -> Result<()>;

    /// Start an all-or-nothing unit of work for one table
    fn begin_table_write(&mut self, name: &str) -> Result<()>;

    fn commit_table_write(&mut self, name: &str) -> Result<()>;

    fn abort_table_write(&mut self, name: &str) -> Result<()>;

    /// Make every committed table write durable
    ///
    /// `Err` means nothing of this session reached the container. Failures
    /// after the data is durable are logged, not returned.
    fn close(self) -> Result<()>;
}

/// SQLite-backed container engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteContainer;

impl SqliteContainer {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerEngine for SqliteContainer {
    type Session = SqliteSession;

    fn create(&self, path: &Path) -> Result<()> {
        for stale in [path.to_path_buf(), journal_path(path)] {
            if stale.exists() {
                std::fs::remove_file(&stale).map_err(|e| {
                    RecorderError::Io(format!("Failed to truncate {:?}: {}", stale, e))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            RecorderError::Io(format!("Failed to create container {:?}: {}", path, e))
        })?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RecorderError::Io(format!("Schema creation failed: {}", e)))?;

        conn.execute(
            "INSERT INTO container_meta (key, value) VALUES ('format', ?1), ('version', ?2)",
            params![FORMAT_MARKER, FORMAT_VERSION],
        )
        .map_err(|e| RecorderError::Io(format!("Failed to write container metadata: {}", e)))?;

        conn.close()
            .map_err(|(_, e)| RecorderError::Io(format!("Failed to close container: {}", e)))?;

        info!("Created container {:?}", path);
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| RecorderError::Io(format!("Failed to open container {:?}: {}", path, e)))?;
        check_format(&conn, path)
    }

    fn open_read_write(&self, path: &Path) -> Result<SqliteSession> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RecorderError::Io(format!("Failed to open container {:?}: {}", path, e)))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| RecorderError::Io(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| RecorderError::Io(format!("Failed to lock container {:?}: {}", path, e)))?;

        Ok(SqliteSession {
            conn,
            path: path.to_path_buf(),
        })
    }
}

/// The transaction is already durable here; a close error must not make
/// the caller retry it
fn release_committed(closed: std::result::Result<(), (Connection, rusqlite::Error)>, path: &Path) {
    if let Err((_, e)) = closed {
        warn!("Container {:?} committed but did not close cleanly: {}", path, e);
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}

fn check_format(conn: &Connection, path: &Path) -> Result<()> {
    let marker: Option<String> = conn
        .query_row(
            "SELECT value FROM container_meta WHERE key = 'format'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| RecorderError::Io(format!("{:?} is not a recorder container: {}", path, e)))?;

    match marker.as_deref() {
        Some(FORMAT_MARKER) => Ok(()),
        other => Err(RecorderError::Io(format!(
            "{:?} is not a recorder container (format marker {:?})",
            path, other
        ))),
    }
}

fn load_table_info(conn: &Connection, name: &str) -> Result<Option<TableInfo>> {
    let row = conn
        .query_row(
            "SELECT dtype, trailing_shape, length, compression, created_at FROM datasets WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| RecorderError::Io(format!("Failed to read catalog entry '{}': {}", name, e)))?;

    let Some((dtype, trailing_shape, length, compression, created_at)) = row else {
        return Ok(None);
    };

    let dtype: DType = serde_json::from_str(&dtype)
        .map_err(|e| RecorderError::Io(format!("Corrupt dtype for table '{}': {}", name, e)))?;
    let trailing_shape: Vec<usize> = serde_json::from_str(&trailing_shape)
        .map_err(|e| RecorderError::Io(format!("Corrupt shape for table '{}': {}", name, e)))?;

    Ok(Some(TableInfo {
        name: name.to_string(),
        dtype,
        trailing_shape,
        len: length as usize,
        compression: CompressionLevel::from_i32(compression)?,
        created_at,
    }))
}

/// Open read/write session on a SQLite container
pub struct SqliteSession {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSession {
    fn require_info(&self, name: &str) -> Result<TableInfo> {
        load_table_info(&self.conn, name)?.ok_or_else(|| {
            RecorderError::InvalidOperation(format!("Table '{}' does not exist", name))
        })
    }
}

impl ContainerSession for SqliteSession {
    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(load_table_info(&self.conn, name)?.is_some())
    }

    fn table_info(&self, name: &str) -> Result<Option<TableInfo>> {
        load_table_info(&self.conn, name)
    }

    fn create_table(
        &mut self,
        name: &str,
        initial_rows: usize,
        trailing_shape: &[usize],
        dtype: &DType,
        compression: CompressionLevel,
    ) -> Result<TableInfo> {
        if self.table_exists(name)? {
            return Err(RecorderError::InvalidOperation(format!(
                "Table '{}' already exists",
                name
            )));
        }

        let dtype_json = serde_json::to_string(dtype)
            .map_err(|e| RecorderError::Io(format!("Failed to encode dtype: {}", e)))?;
        let shape_json = serde_json::to_string(trailing_shape)
            .map_err(|e| RecorderError::Io(format!("Failed to encode shape: {}", e)))?;

        let info = TableInfo {
            name: name.to_string(),
            dtype: dtype.clone(),
            trailing_shape: trailing_shape.to_vec(),
            len: initial_rows,
            compression,
            created_at: chrono::Utc::now().timestamp(),
        };

        self.conn
            .execute(
                r#"
                INSERT INTO datasets (name, dtype, trailing_shape, row_bytes, length, compression, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    name,
                    dtype_json,
                    shape_json,
                    info.row_bytes() as i64,
                    initial_rows as i64,
                    compression.as_i32(),
                    info.created_at,
                ],
            )
            .map_err(|e| RecorderError::Io(format!("Failed to create table '{}': {}", name, e)))?;

        debug!(
            "Created table '{}' {} {:?} with {} rows",
            name, dtype, trailing_shape, initial_rows
        );

        Ok(info)
    }

    fn resize_leading_dim(&mut self, name: &str, new_size: usize) -> Result<()> {
        let info = self.require_info(name)?;
        if new_size < info.len {
            return Err(RecorderError::InvalidOperation(format!(
                "Table '{}' cannot shrink from {} to {} rows",
                name, info.len, new_size
            )));
        }

        self.conn
            .execute(
                "UPDATE datasets SET length = ?1 WHERE name = ?2",
                params![new_size as i64, name],
            )
            .map_err(|e| RecorderError::Io(format!("Failed to resize table '{}': {}", name, e)))?;

        Ok(())
    }

    fn write_rows(&mut self, name: &str, start: usize, rows: &NdArray) -> Result<()> {
        let info = self.require_info(name)?;

        if rows.dtype() != &info.dtype {
            return Err(RecorderError::DtypeMismatch {
                table: name.to_string(),
                expected: info.dtype.to_string(),
                found: rows.dtype().to_string(),
            });
        }
        if rows.is_scalar() || rows.row_shape() != info.trailing_shape.as_slice() {
            return Err(RecorderError::ShapeMismatch {
                table: name.to_string(),
                expected: info.trailing_shape.clone(),
                found: rows.row_shape().to_vec(),
            });
        }

        let count = rows.len().unwrap_or(0);
        let end = start + count;
        if end > info.len {
            return Err(RecorderError::InvalidOperation(format!(
                "Rows {}..{} exceed table '{}' length {}",
                start, end, name, info.len
            )));
        }
        if count == 0 {
            return Ok(());
        }

        let overlapping: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE dataset = ?1 AND start_row < ?3 AND start_row + row_count > ?2",
                params![name, start as i64, end as i64],
                |row| row.get(0),
            )
            .map_err(|e| RecorderError::Io(format!("Failed to query chunks: {}", e)))?;
        if overlapping > 0 {
            return Err(RecorderError::InvalidOperation(format!(
                "Rows {}..{} of table '{}' are already written",
                start, end, name
            )));
        }

        let (codec, payload) = Compressor::new(info.compression).compress(rows.as_bytes())?;

        self.conn
            .execute(
                "INSERT INTO chunks (dataset, start_row, row_count, codec, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, start as i64, count as i64, codec.tag(), payload],
            )
            .map_err(|e| {
                RecorderError::Io(format!("Failed to write rows to table '{}': {}", name, e))
            })?;

        Ok(())
    }

    fn begin_table_write(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute_batch("SAVEPOINT table_write")
            .map_err(|e| RecorderError::Io(format!("Failed to begin write of '{}': {}", name, e)))
    }

    fn commit_table_write(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute_batch("RELEASE table_write")
            .map_err(|e| RecorderError::Io(format!("Failed to commit write of '{}': {}", name, e)))
    }

    fn abort_table_write(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK TO table_write; RELEASE table_write")
            .map_err(|e| RecorderError::Io(format!("Failed to roll back write of '{}': {}", name, e)))
    }

    fn close(self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| RecorderError::Io(format!("Failed to commit {:?}: {}", self.path, e)))?;

        release_committed(self.conn.close(), &self.path);
        Ok(())
    }
}

/// Read-only snapshot of a container
///
/// The recorder keeps the file closed between flushes, so a reader can be
/// opened while recording is in progress.
pub struct ContainerReader {
    conn: Connection,
    path: PathBuf,
}

impl ContainerReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| RecorderError::Io(format!("Failed to open container {:?}: {}", path, e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| RecorderError::Io(format!("Failed to set busy timeout: {}", e)))?;
        check_format(&conn, path)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Table names in creation order
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM datasets ORDER BY rowid")
            .map_err(|e| RecorderError::Io(format!("Query preparation failed: {}", e)))?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| RecorderError::Io(format!("Query execution failed: {}", e)))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| RecorderError::Io(format!("Result collection failed: {}", e)))?;

        Ok(names)
    }

    pub fn table_info(&self, name: &str) -> Result<Option<TableInfo>> {
        load_table_info(&self.conn, name)
    }

    /// Leading dimension of `name`, or `None` if the table does not exist
    pub fn table_len(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.table_info(name)?.map(|info| info.len))
    }

    /// Read a whole table as one array of shape `[len] + trailing_shape`
    pub fn read_table(&self, name: &str) -> Result<NdArray> {
        let info = self.table_info(name)?.ok_or_else(|| {
            RecorderError::InvalidOperation(format!("Table '{}' does not exist", name))
        })?;

        let row_bytes = info.row_bytes();
        let mut data = vec![0u8; info.len * row_bytes];

        let mut stmt = self
            .conn
            .prepare("SELECT start_row, row_count, codec, payload FROM chunks WHERE dataset = ?1 ORDER BY start_row")
            .map_err(|e| RecorderError::Io(format!("Query preparation failed: {}", e)))?;

        let chunks = stmt
            .query_map(params![name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .map_err(|e| RecorderError::Io(format!("Query execution failed: {}", e)))?;

        for chunk in chunks {
            let (start, count, codec, payload) =
                chunk.map_err(|e| RecorderError::Io(format!("Failed to read chunk: {}", e)))?;
            let bytes = Compressor::decompress(Codec::from_tag(codec)?, &payload)?;

            let offset = start as usize * row_bytes;
            let expected = count as usize * row_bytes;
            if bytes.len() != expected || offset + expected > data.len() {
                return Err(RecorderError::Io(format!(
                    "Corrupt chunk at row {} of table '{}'",
                    start, name
                )));
            }
            data[offset..offset + expected].copy_from_slice(&bytes);
        }

        NdArray::from_bytes(info.dtype.clone(), info.shape(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn floats(values: &[f64]) -> NdArray {
        NdArray::from_vec(vec![values.len()], values.to_vec()).unwrap()
    }

    #[test]
    fn test_create_and_validate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();

        engine.create(&path).unwrap();
        assert!(engine.validate(&path).is_ok());

        let reader = ContainerReader::open(&path).unwrap();
        assert!(reader.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        drop(conn);

        assert!(matches!(
            SqliteContainer::new().validate(&path),
            Err(RecorderError::Io(_))
        ));
    }

    #[test]
    fn test_open_missing_container_fails() {
        let dir = tempdir().unwrap();
        let result = SqliteContainer::new().open_read_write(&dir.path().join("absent.db"));
        assert!(matches!(result, Err(RecorderError::Io(_))));
    }

    #[test]
    fn test_grow_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 2, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        session.write_rows("x", 0, &floats(&[1.0, 2.0])).unwrap();
        session.resize_leading_dim("x", 5).unwrap();
        session.write_rows("x", 2, &floats(&[3.0, 4.0, 5.0])).unwrap();
        session.close().unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.table_len("x").unwrap(), Some(5));
        let table = reader.read_table("x").unwrap();
        assert_eq!(table.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_unwritten_rows_read_as_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 3, &[], &DType::U16, CompressionLevel::None)
            .unwrap();
        session.close().unwrap();

        let table = ContainerReader::open(&path).unwrap().read_table("x").unwrap();
        assert_eq!(table.to_vec::<u16>().unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_no_shrink_no_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 2, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        session.write_rows("x", 0, &floats(&[1.0, 2.0])).unwrap();

        assert!(session.resize_leading_dim("x", 1).is_err());
        assert!(session.write_rows("x", 1, &floats(&[9.0])).is_err());
        assert!(session.write_rows("x", 2, &floats(&[9.0])).is_err());
    }

    #[test]
    fn test_compressed_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let frames = NdArray::scalar(0.25f64).broadcast(vec![4, 23, 29]).unwrap();
        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("frames", 4, &[23, 29], &DType::F64, CompressionLevel::Best)
            .unwrap();
        session.write_rows("frames", 0, &frames).unwrap();
        session.close().unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        let info = reader.table_info("frames").unwrap().unwrap();
        assert_eq!(info.compression, CompressionLevel::Best);
        assert_eq!(reader.read_table("frames").unwrap(), frames);
    }

    #[test]
    fn test_aborted_table_write_rolls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session.begin_table_write("x").unwrap();
        session
            .create_table("x", 1, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        session.abort_table_write("x").unwrap();
        assert!(!session.table_exists("x").unwrap());
        session.close().unwrap();
    }

    #[test]
    fn test_dropped_session_discards_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 1, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        drop(session);

        let reader = ContainerReader::open(&path).unwrap();
        assert!(reader.table_info("x").unwrap().is_none());
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 0, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        session.close().unwrap();

        engine.create(&path).unwrap();
        let reader = ContainerReader::open(&path).unwrap();
        assert!(reader.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_close_failure_after_commit_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let engine = SqliteContainer::new();
        engine.create(&path).unwrap();

        let mut session = engine.open_read_write(&path).unwrap();
        session
            .create_table("x", 2, &[], &DType::F64, CompressionLevel::None)
            .unwrap();
        session.close().unwrap();

        // A connection that fails to close after COMMIT is only logged
        let conn = Connection::open_in_memory().unwrap();
        release_committed(Err((conn, rusqlite::Error::InvalidQuery)), &path);

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.table_len("x").unwrap(), Some(2));
    }
}
