//! In-memory wide-column store implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::row::merge_cells;
use crate::{Cell, ColumnStore, Mutation, Row, RowResults, StoreError, StoreResult, check_bulk_args};

/// An in-memory store backed by an ordered map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<BTreeMap<String, Vec<Cell>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ColumnStore for MemoryStore {
    async fn apply_bulk(&self, keys: &[String], mutations: &[Mutation]) -> StoreResult<RowResults> {
        check_bulk_args(keys, mutations)?;

        let mut rows = self
            .rows
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let mut results = Vec::with_capacity(keys.len());
        for (key, mutation) in keys.iter().zip(mutations) {
            if key.is_empty() {
                results.push(Err(StoreError::RowRejected {
                    key: key.clone(),
                    reason: "empty row key".into(),
                }));
                continue;
            }
            if mutation.is_empty() {
                results.push(Err(StoreError::RowRejected {
                    key: key.clone(),
                    reason: "empty mutation".into(),
                }));
                continue;
            }
            let cells = rows.entry(key.clone()).or_default();
            merge_cells(cells, mutation);
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn read_rows(&self, prefix: &str) -> StoreResult<Vec<Row>> {
        let rows = self
            .rows
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, cells)| Row::new(k.clone(), cells.clone()))
            .collect())
    }
}
