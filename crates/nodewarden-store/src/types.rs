//! Row and cell types for the quorum store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    Instances,
    Locks,
}

/// A single column value with its write metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    pub value: String,
    /// Epoch millis assigned by the store when the cell was written.
    pub written_at: u64,
    /// Epoch millis after which the cell no longer exists.
    pub expires_at: Option<u64>,
}

impl Cell {
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// On-disk encoding of a row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub columns: BTreeMap<String, Cell>,
}

impl StoredRow {
    pub(crate) fn retain_live(&mut self, now: u64) {
        self.columns.retain(|_, cell| cell.is_live(now));
    }
}

/// A row as seen by readers: only live cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub columns: BTreeMap<String, Cell>,
}

impl Row {
    /// Value of a column, if present.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(|c| c.value.as_str())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Latest write timestamp across the row's cells.
    pub fn written_at(&self) -> u64 {
        self.columns
            .values()
            .map(|c| c.written_at)
            .max()
            .unwrap_or_default()
    }
}
