//! The store contract the registry and lock manager are written against.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{ColumnFamily, Row};

/// A replicated row/column store with per-cell TTLs.
///
/// Implementations may be eventually consistent across nodes; callers
/// must not assume a write is visible to every reader immediately.
#[async_trait]
pub trait QuorumStore: Send + Sync {
    /// Write (or overwrite) columns of a row. `ttl` applies to every
    /// column written by this call.
    async fn put_columns(
        &self,
        cf: ColumnFamily,
        row: &str,
        columns: &[(&str, &str)],
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Read a row's live columns. `None` when no live column remains.
    async fn get_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<Option<Row>>;

    /// Remove named columns from a row. Missing columns are ignored.
    async fn delete_columns(&self, cf: ColumnFamily, row: &str, columns: &[&str])
    -> StoreResult<()>;

    /// Remove a whole row. Returns true if it existed.
    async fn delete_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<bool>;

    /// Every row with at least one live column.
    async fn scan(&self, cf: ColumnFamily) -> StoreResult<Vec<Row>>;
}
