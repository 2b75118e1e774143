// src/storage/mod.rs
//! Container persistence
//!
//! - **Container**: the container file engine (SQLite-backed by default) and
//!   a read-only snapshot reader
//! - **Dataset Store**: create-or-grow-and-write of drained batches

pub mod container;
pub mod dataset_store;

#[cfg(test)]
pub(crate) mod testing;

pub use container::{
    ContainerEngine, ContainerReader, ContainerSession, SqliteContainer, TableInfo,
};
pub use dataset_store::{CommitReport, DatasetStore, OpenMode};
