//! Deadline decorator for any `QuorumStore`.
//!
//! Store calls that outlive the deadline surface as
//! `StoreError::Unavailable` instead of hanging the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::quorum::QuorumStore;
use crate::types::{ColumnFamily, Row};

pub struct BoundedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: QuorumStore> BoundedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "store call timed out");
                Err(StoreError::Unavailable(format!(
                    "{op} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<S: QuorumStore> QuorumStore for BoundedStore<S> {
    async fn put_columns(
        &self,
        cf: ColumnFamily,
        row: &str,
        columns: &[(&str, &str)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.bounded("put_columns", self.inner.put_columns(cf, row, columns, ttl))
            .await
    }

    async fn get_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<Option<Row>> {
        self.bounded("get_row", self.inner.get_row(cf, row)).await
    }

    async fn delete_columns(
        &self,
        cf: ColumnFamily,
        row: &str,
        columns: &[&str],
    ) -> StoreResult<()> {
        self.bounded("delete_columns", self.inner.delete_columns(cf, row, columns))
            .await
    }

    async fn delete_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<bool> {
        self.bounded("delete_row", self.inner.delete_row(cf, row)).await
    }

    async fn scan(&self, cf: ColumnFamily) -> StoreResult<Vec<Row>> {
        self.bounded("scan", self.inner.scan(cf)).await
    }
}
