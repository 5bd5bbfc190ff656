//! Row, cell and mutation types.

use serde::{Deserialize, Serialize};

/// A single versioned value within a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "f")]
    pub family: String,

    #[serde(rename = "q")]
    pub qualifier: String,

    /// Cell version in microseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp: i64,

    #[serde(rename = "v")]
    pub value: Vec<u8>,
}

impl Cell {
    /// Column name in `family:qualifier` form.
    pub fn column(&self) -> String {
        format!("{}:{}", self.family, self.qualifier)
    }
}

/// An ordered set of cell writes for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutation {
    sets: Vec<Cell>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a cell write. Later sets of the same column win when their
    /// timestamp is not older than the live cell.
    pub fn set(
        &mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        timestamp: i64,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.sets.push(Cell {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.sets
    }
}

/// A row as returned by a scan: its key and the live cell of every column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(key: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self { key: key.into(), cells }
    }

    /// Look up the live cell for a column.
    pub fn cell(&self, family: &str, qualifier: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|c| c.family == family && c.qualifier == qualifier)
    }

    /// Column value as UTF-8. None when absent or not valid UTF-8.
    pub fn value_str(&self, family: &str, qualifier: &str) -> Option<&str> {
        self.cell(family, qualifier)
            .and_then(|c| std::str::from_utf8(&c.value).ok())
    }

    /// Iterate the cells of one column family.
    pub fn family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells.iter().filter(move |c| c.family == family)
    }
}

/// Merge a mutation into a row's live cells.
///
/// Cells stay sorted by column so scans are deterministic. A write with a
/// timestamp older than the live cell is dropped.
pub(crate) fn merge_cells(cells: &mut Vec<Cell>, mutation: &Mutation) {
    for set in mutation.cells() {
        match cells
            .iter_mut()
            .find(|c| c.family == set.family && c.qualifier == set.qualifier)
        {
            Some(live) if set.timestamp >= live.timestamp => *live = set.clone(),
            Some(_) => {}
            None => cells.push(set.clone()),
        }
    }
    cells.sort_by(|a, b| (&a.family, &a.qualifier).cmp(&(&b.family, &b.qualifier)));
}
