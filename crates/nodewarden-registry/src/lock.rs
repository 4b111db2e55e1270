//! LockManager — best-effort mutual exclusion over store rows.
//!
//! Two rows per lock id:
//! - `{id}-choosing`: every claimant writes a column named after itself
//!   with a short TTL, then reads the row back. More than one claimant
//!   present means a race in progress.
//! - `{id}-lock`: the current holder, long TTL.
//!
//! After writing the lock row the claimant waits a fixed interval for the
//! write to propagate, then re-reads it. This is a heuristic against an
//! eventually consistent store, not a proof of exclusivity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use nodewarden_store::{ColumnFamily, QuorumStore};

use crate::error::{LockError, LockResult};

/// TTLs and the propagation wait of the two-phase protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimings {
    pub choosing_ttl: Duration,
    pub lock_ttl: Duration,
    pub propagation_wait: Duration,
}

impl Default for LockTimings {
    fn default() -> Self {
        Self {
            choosing_ttl: Duration::from_secs(6),
            lock_ttl: Duration::from_secs(600),
            propagation_wait: Duration::from_millis(100),
        }
    }
}

pub fn choosing_key(lock_id: &str) -> String {
    format!("{lock_id}-choosing")
}

pub fn lock_key(lock_id: &str) -> String {
    format!("{lock_id}-lock")
}

pub struct LockManager {
    store: Arc<dyn QuorumStore>,
    timings: LockTimings,
}

impl LockManager {
    pub fn new(store: Arc<dyn QuorumStore>) -> Self {
        Self {
            store,
            timings: LockTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: LockTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Try to take the lock for `lock_id` on behalf of `holder`.
    ///
    /// Re-acquiring a lock already held by the same holder succeeds.
    pub async fn acquire(&self, lock_id: &str, holder: &str) -> LockResult<()> {
        let choosing = choosing_key(lock_id);
        let lock = lock_key(lock_id);

        self.store
            .put_columns(
                ColumnFamily::Locks,
                &choosing,
                &[(holder, holder)],
                Some(self.timings.choosing_ttl),
            )
            .await?;

        let claimants = self.other_columns(&choosing, holder).await?;
        if !claimants.is_empty() {
            debug!(%lock_id, %holder, ?claimants, "concurrent claimants detected");
            self.withdraw_choosing(&choosing, holder).await;
            return Err(LockError::Contention {
                lock_id: lock_id.to_string(),
            });
        }

        if let Some(current) = self.other_columns(&lock, holder).await?.into_iter().next() {
            debug!(%lock_id, %holder, %current, "lock held by another claimant");
            self.withdraw_choosing(&choosing, holder).await;
            return Err(LockError::Held {
                lock_id: lock_id.to_string(),
                holder: current,
            });
        }

        self.store
            .put_columns(
                ColumnFamily::Locks,
                &lock,
                &[(holder, holder)],
                Some(self.timings.lock_ttl),
            )
            .await?;

        tokio::time::sleep(self.timings.propagation_wait).await;

        let confirmed = match self.store.get_row(ColumnFamily::Locks, &lock).await? {
            Some(row) => {
                let mut names = row.column_names();
                names.next() == Some(holder) && names.next().is_none()
            }
            None => false,
        };
        if !confirmed {
            warn!(%lock_id, %holder, "lock row changed during propagation wait");
            if let Err(e) = self
                .store
                .delete_columns(ColumnFamily::Locks, &lock, &[holder])
                .await
            {
                warn!(%lock_id, %holder, error = %e, "failed to withdraw lock column");
            }
            self.withdraw_choosing(&choosing, holder).await;
            return Err(LockError::Contention {
                lock_id: lock_id.to_string(),
            });
        }

        info!(%lock_id, %holder, "lock acquired");
        Ok(())
    }

    /// Drop both the lock row and the choosing row for `lock_id`.
    pub async fn release(&self, lock_id: &str, holder: &str) -> LockResult<()> {
        self.store
            .delete_row(ColumnFamily::Locks, &lock_key(lock_id))
            .await?;
        self.store
            .delete_row(ColumnFamily::Locks, &choosing_key(lock_id))
            .await?;
        debug!(%lock_id, %holder, "lock released");
        Ok(())
    }

    /// Other claimants with a live choosing entry for `lock_id`, i.e. an
    /// acquire that is in progress or finished within the choosing TTL.
    pub async fn claimants(&self, lock_id: &str, holder: &str) -> LockResult<Vec<String>> {
        self.other_columns(&choosing_key(lock_id), holder).await
    }

    /// Column names in `row` that belong to someone other than `holder`.
    async fn other_columns(&self, row: &str, holder: &str) -> LockResult<Vec<String>> {
        let others = match self.store.get_row(ColumnFamily::Locks, row).await? {
            Some(row) => row
                .column_names()
                .filter(|name| *name != holder)
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        Ok(others)
    }

    async fn withdraw_choosing(&self, choosing: &str, holder: &str) {
        if let Err(e) = self
            .store
            .delete_columns(ColumnFamily::Locks, choosing, &[holder])
            .await
        {
            warn!(row = %choosing, %holder, error = %e, "failed to withdraw choosing column");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nodewarden_store::{RedbStore, Row, StoreResult};

    fn shared_store() -> Arc<dyn QuorumStore> {
        Arc::new(RedbStore::open_in_memory().unwrap())
    }

    /// One node's view of a two-replica store: reads and writes hit the
    /// local replica immediately and reach the peer replica after `lag`.
    struct LaggedReplica {
        local: RedbStore,
        peer: RedbStore,
        lag: Duration,
    }

    fn replica_pair(lag: Duration) -> (Arc<dyn QuorumStore>, Arc<dyn QuorumStore>) {
        let a = RedbStore::open_in_memory().unwrap();
        let b = RedbStore::open_in_memory().unwrap();
        let view_a = LaggedReplica {
            local: a.clone(),
            peer: b.clone(),
            lag,
        };
        let view_b = LaggedReplica {
            local: b,
            peer: a,
            lag,
        };
        (Arc::new(view_a), Arc::new(view_b))
    }

    #[async_trait]
    impl QuorumStore for LaggedReplica {
        async fn put_columns(
            &self,
            cf: ColumnFamily,
            row: &str,
            columns: &[(&str, &str)],
            ttl: Option<Duration>,
        ) -> StoreResult<()> {
            self.local.put_columns(cf, row, columns, ttl).await?;
            let peer = self.peer.clone();
            let lag = self.lag;
            let row = row.to_string();
            let owned: Vec<(String, String)> = columns
                .iter()
                .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
                .collect();
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                let borrowed: Vec<(&str, &str)> =
                    owned.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
                let _ = peer.put_columns(cf, &row, &borrowed, ttl).await;
            });
            Ok(())
        }

        async fn get_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<Option<Row>> {
            self.local.get_row(cf, row).await
        }

        async fn delete_columns(
            &self,
            cf: ColumnFamily,
            row: &str,
            columns: &[&str],
        ) -> StoreResult<()> {
            self.local.delete_columns(cf, row, columns).await?;
            let peer = self.peer.clone();
            let lag = self.lag;
            let row = row.to_string();
            let owned: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                let borrowed: Vec<&str> = owned.iter().map(String::as_str).collect();
                let _ = peer.delete_columns(cf, &row, &borrowed).await;
            });
            Ok(())
        }

        async fn delete_row(&self, cf: ColumnFamily, row: &str) -> StoreResult<bool> {
            let existed = self.local.delete_row(cf, row).await?;
            let peer = self.peer.clone();
            let lag = self.lag;
            let row = row.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                let _ = peer.delete_row(cf, &row).await;
            });
            Ok(existed)
        }

        async fn scan(&self, cf: ColumnFamily) -> StoreResult<Vec<Row>> {
            self.local.scan(cf).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn uncontended_acquire_succeeds() {
        let store = shared_store();
        let locks = LockManager::new(Arc::clone(&store));

        locks.acquire("es_dc_i-1", "holder-a").await.unwrap();

        let lock = store
            .get_row(ColumnFamily::Locks, "es_dc_i-1-lock")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.column_names().collect::<Vec<_>>(), vec!["holder-a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_propagation() {
        let locks = LockManager::new(shared_store());
        let start = tokio::time::Instant::now();

        locks.acquire("id", "holder-a").await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn same_holder_can_reacquire() {
        let locks = LockManager::new(shared_store());
        locks.acquire("id", "holder-a").await.unwrap();
        locks.acquire("id", "holder-a").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_holder_sees_lock_held() {
        let store = shared_store();
        let locks = LockManager::new(Arc::clone(&store));
        locks.acquire("id", "holder-a").await.unwrap();
        // Let the first claimant's choosing column go away, leaving only the lock row.
        store
            .delete_row(ColumnFamily::Locks, &choosing_key("id"))
            .await
            .unwrap();

        let err = locks.acquire("id", "holder-b").await.unwrap_err();
        match err {
            LockError::Held { holder, .. } => assert_eq!(holder, "holder-a"),
            other => panic!("expected Held, got {other:?}"),
        }
        // The loser leaves no choosing column behind.
        assert!(
            store
                .get_row(ColumnFamily::Locks, &choosing_key("id"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_choosing_column_is_contention() {
        let store = shared_store();
        store
            .put_columns(
                ColumnFamily::Locks,
                &choosing_key("id"),
                &[("holder-a", "holder-a")],
                Some(Duration::from_secs(6)),
            )
            .await
            .unwrap();

        let locks = LockManager::new(Arc::clone(&store));
        let err = locks.acquire("id", "holder-b").await.unwrap_err();
        assert!(matches!(err, LockError::Contention { .. }));

        let choosing = store
            .get_row(ColumnFamily::Locks, &choosing_key("id"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(choosing.column_names().collect::<Vec<_>>(), vec!["holder-a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_claimants_on_one_replica_have_one_winner() {
        let store = shared_store();
        let a = LockManager::new(Arc::clone(&store));
        let b = LockManager::new(Arc::clone(&store));

        let (ra, rb) = tokio::join!(a.acquire("id", "holder-a"), b.acquire("id", "holder-b"));

        assert_eq!(
            [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one claimant should win: {ra:?} / {rb:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn release_clears_both_rows() {
        let store = shared_store();
        let locks = LockManager::new(Arc::clone(&store));
        locks.acquire("id", "holder-a").await.unwrap();

        locks.release("id", "holder-a").await.unwrap();

        assert!(store.scan(ColumnFamily::Locks).await.unwrap().is_empty());
        // And someone else can now take it.
        locks.acquire("id", "holder-b").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn claimants_beyond_propagation_window_exclude_each_other() {
        // Replication (30ms) is faster than the propagation wait (100ms).
        let (view_a, view_b) = replica_pair(Duration::from_millis(30));
        let a = LockManager::new(view_a);
        let b = LockManager::new(view_b);

        a.acquire("id", "holder-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = b.acquire("id", "holder-b").await.unwrap_err();
        assert!(matches!(
            err,
            LockError::Contention { .. } | LockError::Held { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn claimants_within_propagation_window_can_both_win() {
        // Replication (500ms) is slower than the propagation wait (100ms):
        // neither claimant sees the other before confirming. This is the
        // documented blind spot of the protocol.
        let (view_a, view_b) = replica_pair(Duration::from_millis(500));
        let a = LockManager::new(view_a);
        let b = LockManager::new(view_b);

        let (ra, rb) = tokio::join!(a.acquire("id", "holder-a"), b.acquire("id", "holder-b"));

        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn longer_propagation_wait_closes_the_window() {
        let (view_a, view_b) = replica_pair(Duration::from_millis(500));
        let timings = LockTimings {
            propagation_wait: Duration::from_secs(1),
            ..LockTimings::default()
        };
        let a = LockManager::new(view_a).with_timings(timings);
        let b = LockManager::new(view_b).with_timings(timings);

        let (ra, rb) = tokio::join!(a.acquire("id", "holder-a"), b.acquire("id", "holder-b"));

        // Both see the other's lock column after the wait; neither may win.
        assert!(ra.is_err() && rb.is_err(), "{ra:?} / {rb:?}");
    }
}
