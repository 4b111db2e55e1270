//! RedbStore — redb-backed quorum store.
//!
//! Each column family is one redb table. A row is JSON-encoded into the
//! table's `&[u8]` value column together with its cells' write timestamps
//! and expiry. The store supports both on-disk and in-memory backends
//! (the latter for testing and single-node development).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use nodewarden_core::time::epoch_millis;

use crate::error::{StoreError, StoreResult};
use crate::quorum::QuorumStore;
use crate::tables::{self, INSTANCES, LOCKS};
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Source of "now" in epoch millis.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Thread-safe quorum store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    clock: Clock,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "quorum store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory quorum store opened");
        Ok(store)
    }

    /// Replace the wall clock used for write timestamps and TTL checks.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            clock: Arc::new(epoch_millis),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn decode(bytes: &[u8]) -> StoreResult<StoredRow> {
        serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
    }

    fn live_row(key: &str, mut stored: StoredRow, now: u64) -> Option<Row> {
        stored.retain_live(now);
        if stored.columns.is_empty() {
            return None;
        }
        Some(Row {
            key: key.to_string(),
            columns: stored.columns,
        })
    }

    fn put_sync(
        &self,
        cf: ColumnFamily,
        key: &str,
        columns: &[(&str, &str)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let now = self.now();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64));

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(tables::table_for(cf)).map_err(map_err!(Table))?;
            let mut stored = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Self::decode(guard.value())?,
                None => StoredRow::default(),
            };
            stored.retain_live(now);
            for (name, value) in columns {
                stored.columns.insert(
                    (*name).to_string(),
                    Cell {
                        value: (*value).to_string(),
                        written_at: now,
                        expires_at,
                    },
                );
            }
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(?cf, %key, columns = columns.len(), ?ttl, "columns written");
        Ok(())
    }

    fn get_sync(&self, cf: ColumnFamily, key: &str) -> StoreResult<Option<Row>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(tables::table_for(cf)).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let stored = Self::decode(guard.value())?;
                Ok(Self::live_row(key, stored, self.now()))
            }
            None => Ok(None),
        }
    }

    fn delete_columns_sync(
        &self,
        cf: ColumnFamily,
        key: &str,
        columns: &[&str],
    ) -> StoreResult<()> {
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(tables::table_for(cf)).map_err(map_err!(Table))?;
            let existing = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(Self::decode(guard.value())?),
                None => None,
            };
            if let Some(mut stored) = existing {
                stored.retain_live(now);
                for name in columns {
                    stored.columns.remove(*name);
                }
                if stored.columns.is_empty() {
                    table.remove(key).map_err(map_err!(Write))?;
                } else {
                    let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
                    table
                        .insert(key, value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(?cf, %key, ?columns, "columns deleted");
        Ok(())
    }

    fn delete_row_sync(&self, cf: ColumnFamily, key: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(tables::table_for(cf)).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(?cf, %key, existed, "row deleted");
        Ok(existed)
    }

    fn scan_sync(&self, cf: ColumnFamily) -> StoreResult<Vec<Row>> {
        let now = self.now();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(tables::table_for(cf)).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let stored = Self::decode(value.value())?;
            if let Some(row) = Self::live_row(key.value(), stored, now) {
                results.push(row);
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl QuorumStore for RedbStore {
    async fn put_columns(
        &self,
        cf: ColumnFamily,
        row: &str,
        columns: &[(&str, &str)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.put_sync(cf, row, columns, ttl)
    }

    async fn get_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<Option<Row>> {
        self.get_sync(cf, row)
    }

    async fn delete_columns(
        &self,
        cf: ColumnFamily,
        row: &str,
        columns: &[&str],
    ) -> StoreResult<()> {
        self.delete_columns_sync(cf, row, columns)
    }

    async fn delete_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<bool> {
        self.delete_row_sync(cf, row)
    }

    async fn scan(&self, cf: ColumnFamily) -> StoreResult<Vec<Row>> {
        self.scan_sync(cf)
    }
}
