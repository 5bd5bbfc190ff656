//! Wide-column store interface and implementations.
//!
//! Rows are addressed by string keys and hold cells grouped by column
//! family. Rows are written through bulk mutations that carry no cross-row
//! atomicity, and read back through ordered prefix scans. An in-memory
//! implementation serves tests and ephemeral deployments; a redb-based
//! implementation provides persistence.

pub mod memory;
pub mod redb;
pub mod row;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use row::{Cell, Mutation, Row};

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("kv: storage error: {0}")]
    Storage(String),

    #[error("kv: serialization error: {0}")]
    Serialization(String),

    #[error("kv: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("kv: row {key} rejected: {reason}")]
    RowRejected { key: String, reason: String },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-row outcome of a bulk write, aligned with the submitted keys.
pub type RowResults = Vec<StoreResult<()>>;

/// Wide-column store trait.
///
/// Implementations must be safe to share between concurrent requests; a
/// single handle is opened at startup and passed by reference everywhere.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Apply one mutation per row key.
    ///
    /// Rows are applied independently. An outer `Err` means the batch as a
    /// whole failed and nothing should be assumed written. Otherwise the
    /// returned vector holds one result per key, in input order.
    async fn apply_bulk(&self, keys: &[String], mutations: &[Mutation]) -> StoreResult<RowResults>;

    /// Read every row whose key starts with `prefix`, in ascending key order.
    async fn read_rows(&self, prefix: &str) -> StoreResult<Vec<Row>>;

    /// Apply a single row mutation.
    async fn apply(&self, key: &str, mutation: Mutation) -> StoreResult<()> {
        let keys = [key.to_string()];
        let mut results = self.apply_bulk(&keys, std::slice::from_ref(&mutation)).await?;
        results.pop().unwrap_or_else(|| {
            Err(StoreError::Storage(format!("no result for row {key}")))
        })
    }
}

impl fmt::Debug for dyn ColumnStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnStore {{ ... }}")
    }
}

#[async_trait]
impl<S: ColumnStore + ?Sized> ColumnStore for Arc<S> {
    async fn apply_bulk(&self, keys: &[String], mutations: &[Mutation]) -> StoreResult<RowResults> {
        self.as_ref().apply_bulk(keys, mutations).await
    }

    async fn read_rows(&self, prefix: &str) -> StoreResult<Vec<Row>> {
        self.as_ref().read_rows(prefix).await
    }
}

/// Rejects bulk calls whose key and mutation lists differ in length.
pub(crate) fn check_bulk_args(keys: &[String], mutations: &[Mutation]) -> StoreResult<()> {
    if keys.len() != mutations.len() {
        return Err(StoreError::InvalidArgument(format!(
            "{} keys but {} mutations",
            keys.len(),
            mutations.len()
        )));
    }
    Ok(())
}

// Re-export the implementations
pub use self::memory::MemoryStore;
pub use self::redb::{DEFAULT_TABLE, RedbStore};
