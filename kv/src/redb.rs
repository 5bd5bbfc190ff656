//! Redb-based persistent wide-column store implementation.
//!
//! Each row is one redb entry: the row key maps to the msgpack encoding of
//! the row's live cells. Rows of a bulk write are committed in separate
//! write transactions, so a failing row never rolls back its neighbours.
//! Transactions run on the blocking thread pool; the async methods only
//! await their completion.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::row::merge_cells;
use crate::{Cell, ColumnStore, Mutation, Row, RowResults, StoreError, StoreResult, check_bulk_args};

/// Default table name.
pub const DEFAULT_TABLE: &str = "chat_history";

/// A persistent store backed by redb. Cheap to clone.
#[derive(Clone)]
pub struct RedbStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    table: String,
}

fn storage_err<E: ToString>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Storage(format!("blocking task failed: {e}"))
}

fn decode_cells(data: &[u8]) -> StoreResult<Vec<Cell>> {
    rmp_serde::from_slice(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl RedbStore {
    /// Open or create a redb store at the given path using the default table.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_table(path, DEFAULT_TABLE)
    }

    /// Open or create a redb store at the given path with a named table.
    pub fn open_table<P: AsRef<Path>>(path: P, table: &str) -> StoreResult<Self> {
        if table.is_empty() {
            return Err(StoreError::InvalidArgument("empty table name".into()));
        }
        let db = Database::create(path).map_err(storage_err)?;
        let inner = Inner {
            db,
            table: table.to_string(),
        };

        // Create the table if it doesn't exist
        let tx = inner.db.begin_write().map_err(storage_err)?;
        {
            let _ = tx.open_table(inner.definition()).map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.inner.table
    }
}

impl Inner {
    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn apply_row(&self, key: &str, mutation: &Mutation) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::RowRejected {
                key: key.to_string(),
                reason: "empty row key".into(),
            });
        }
        if mutation.is_empty() {
            return Err(StoreError::RowRejected {
                key: key.to_string(),
                reason: "empty mutation".into(),
            });
        }

        let tx = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = tx.open_table(self.definition()).map_err(storage_err)?;
            let mut cells = match table.get(key).map_err(storage_err)? {
                Some(existing) => decode_cells(existing.value())?,
                None => Vec::new(),
            };
            merge_cells(&mut cells, mutation);
            let data = rmp_serde::to_vec_named(&cells)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            table.insert(key, data.as_slice()).map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> StoreResult<Vec<Row>> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let table = tx.open_table(self.definition()).map_err(storage_err)?;

        let mut results = Vec::new();
        for item in table.range::<&str>(prefix..).map_err(storage_err)? {
            let (key, value) = item.map_err(storage_err)?;
            let key_str = key.value();
            if !key_str.starts_with(prefix) {
                break;
            }
            results.push(Row::new(key_str, decode_cells(value.value())?));
        }
        Ok(results)
    }
}

#[async_trait]
impl ColumnStore for RedbStore {
    async fn apply_bulk(&self, keys: &[String], mutations: &[Mutation]) -> StoreResult<RowResults> {
        check_bulk_args(keys, mutations)?;
        let inner = Arc::clone(&self.inner);
        let rows: Vec<(String, Mutation)> = keys.iter().cloned().zip(mutations.iter().cloned()).collect();
        tokio::task::spawn_blocking(move || {
            rows.iter()
                .map(|(key, mutation)| inner.apply_row(key, mutation))
                .collect::<RowResults>()
        })
        .await
        .map_err(join_err)
    }

    async fn read_rows(&self, prefix: &str) -> StoreResult<Vec<Row>> {
        let inner = Arc::clone(&self.inner);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || inner.scan(&prefix))
            .await
            .map_err(join_err)?
    }
}
