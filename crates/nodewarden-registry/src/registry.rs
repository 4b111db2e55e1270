//! InstanceRegistry — CRUD and queries over instance records.
//!
//! Writes to a given row key are serialized through the `LockManager`.
//! The lock taken by `create` is deliberately left in place: it marks the
//! id as claimed until `delete` (or `reclaim`) clears it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use nodewarden_store::{ColumnFamily, QuorumStore};

use crate::error::{RegistryError, RegistryResult};
use crate::lock::LockManager;
use crate::record::{self, COL_CLUSTER, COL_HOLDER, COL_LOCATION, InstanceRecord};

pub struct InstanceRegistry {
    store: Arc<dyn QuorumStore>,
    locks: LockManager,
    /// This process's claimant token.
    holder: String,
}

impl InstanceRegistry {
    pub fn new(store: Arc<dyn QuorumStore>, locks: LockManager, holder: impl Into<String>) -> Self {
        Self {
            store,
            locks,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Register a new record.
    ///
    /// Fails with `DuplicateRegistration` if a live row already exists for
    /// the record's key, or with a lock error if another claimant races.
    pub async fn create(&self, record: &InstanceRecord) -> RegistryResult<()> {
        let key = record.row_key();
        if self
            .store
            .get_row(ColumnFamily::Instances, &key)
            .await?
            .is_some()
        {
            return Err(RegistryError::DuplicateRegistration(key));
        }

        self.locks.acquire(&key, &self.holder).await?;

        let columns = record.columns()?;
        let mut borrowed: Vec<(&str, &str)> = columns
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        borrowed.push((COL_HOLDER, self.holder.as_str()));
        self.store
            .put_columns(ColumnFamily::Instances, &key, &borrowed, None)
            .await?;

        info!(
            logical_id = %record.logical_id(),
            %key,
            holder = %self.holder,
            "instance registered"
        );
        Ok(())
    }

    /// Remove a record and its lock rows so the id can be registered again.
    ///
    /// The lock is re-acquired on behalf of whoever created the row, so any
    /// node may clean up a dead peer while a competing claimant still wins.
    pub async fn delete(&self, record: &InstanceRecord) -> RegistryResult<()> {
        let Some(key) = self
            .find(&record.cluster_name, &record.instance_id, &record.datacenter)
            .await?
        else {
            debug!(logical_id = %record.logical_id(), "no registry row to delete");
            return Ok(());
        };

        let owner = match self.store.get_row(ColumnFamily::Instances, &key).await? {
            Some(row) => row.value(COL_HOLDER).unwrap_or(&self.holder).to_string(),
            None => self.holder.clone(),
        };

        self.locks.acquire(&key, &owner).await?;
        self.store.delete_row(ColumnFamily::Instances, &key).await?;
        self.locks.release(&key, &owner).await?;

        info!(logical_id = %record.logical_id(), %key, %owner, "instance deregistered");
        Ok(())
    }

    /// Forcefully clear a previous registration of an id this process owns.
    ///
    /// Used when the same instance restarts: the old row and any lock left
    /// behind by the previous process are removed without taking the lock.
    /// Nothing is touched while another claimant's choosing entry is live,
    /// so a registration in flight is never wiped. Returns whether a row was
    /// removed.
    pub async fn reclaim(&self, record: &InstanceRecord) -> RegistryResult<bool> {
        let key = record.row_key();
        let claimants = self.locks.claimants(&key, &self.holder).await?;
        if !claimants.is_empty() {
            debug!(
                logical_id = %record.logical_id(),
                ?claimants,
                "registration in flight, leaving it alone"
            );
            return Ok(false);
        }

        let existed = self.store.delete_row(ColumnFamily::Instances, &key).await?;
        self.locks.release(&key, &self.holder).await?;
        if existed {
            warn!(logical_id = %record.logical_id(), %key, "replaced stale registration");
        }
        Ok(existed)
    }

    /// All records of a cluster, optionally limited to one datacenter,
    /// sorted by `(availability_zone, logical_id)`.
    pub async fn get_all(
        &self,
        cluster: &str,
        datacenter: Option<&str>,
    ) -> RegistryResult<Vec<InstanceRecord>> {
        let rows = self.store.scan(ColumnFamily::Instances).await?;
        let mut records: Vec<InstanceRecord> = rows
            .iter()
            .filter(|row| row.value(COL_CLUSTER) == Some(cluster))
            .filter(|row| datacenter.is_none_or(|dc| row.value(COL_LOCATION) == Some(dc)))
            .filter_map(|row| match InstanceRecord::from_row(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %row.key, error = %e, "skipping unreadable registry row");
                    None
                }
            })
            .collect();

        records.sort_by_cached_key(|r| (r.availability_zone.clone(), r.logical_id()));
        debug!(%cluster, ?datacenter, count = records.len(), "registry query");
        Ok(records)
    }

    /// Read a single record by identity.
    pub async fn get(
        &self,
        cluster: &str,
        instance_id: &str,
        datacenter: &str,
    ) -> RegistryResult<Option<InstanceRecord>> {
        let key = record::row_key(cluster, datacenter, instance_id);
        match self.store.get_row(ColumnFamily::Instances, &key).await? {
            Some(row) => Ok(Some(InstanceRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Locate the physical row of a record.
    pub async fn find(
        &self,
        cluster: &str,
        instance_id: &str,
        datacenter: &str,
    ) -> RegistryResult<Option<String>> {
        let key = record::row_key(cluster, datacenter, instance_id);
        let exists = self
            .store
            .get_row(ColumnFamily::Instances, &key)
            .await?
            .is_some();
        Ok(exists.then_some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use nodewarden_store::RedbStore;

    use crate::error::LockError;
    use crate::lock::{choosing_key, lock_key};

    fn test_store() -> Arc<dyn QuorumStore> {
        Arc::new(RedbStore::open_in_memory().unwrap())
    }

    /// A store whose clock only moves when the test says so.
    fn clocked_store(start: u64) -> (Arc<AtomicU64>, Arc<dyn QuorumStore>) {
        let now = Arc::new(AtomicU64::new(start));
        let handle = Arc::clone(&now);
        let store = RedbStore::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(move || handle.load(Ordering::SeqCst)));
        (now, Arc::new(store))
    }

    fn registry(store: &Arc<dyn QuorumStore>, holder: &str) -> InstanceRegistry {
        InstanceRegistry::new(Arc::clone(store), LockManager::new(Arc::clone(store)), holder)
    }

    fn test_record(cluster: &str, dc: &str, id: &str, zone: &str, ip: &str) -> InstanceRecord {
        InstanceRecord {
            cluster_name: cluster.to_string(),
            datacenter: dc.to_string(),
            instance_id: id.to_string(),
            hostname: format!("host-{id}"),
            public_ip: ip.to_string(),
            availability_zone: zone.to_string(),
            asg_name: format!("{cluster}-{zone}"),
            update_time: None,
            attached_volumes: BTreeMap::new(),
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn create_and_read_back() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        let record = test_record("es", "us-east-1", "i-1", "us-east-1a", "10.0.0.1");

        reg.create(&record).await.unwrap();

        let stored = reg.get("es", "i-1", "us-east-1").await.unwrap().unwrap();
        assert_eq!(stored.public_ip, "10.0.0.1");
        assert!(stored.update_time.is_some());
        assert_eq!(
            reg.find("es", "i-1", "us-east-1").await.unwrap(),
            Some("es_us-east-1_i-1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_leaves_lock_in_place() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");

        reg.create(&record).await.unwrap();

        let lock = store
            .get_row(ColumnFamily::Locks, &lock_key(&record.row_key()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.value("holder-a"), Some("holder-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_create_is_rejected() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");

        reg.create(&record).await.unwrap();
        let err = reg.create(&record).await.unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateRegistration(ref k) if k == "es_dc_i-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_creates_have_single_winner() {
        let store = test_store();
        let a = registry(&store, "holder-a");
        let b = registry(&store, "holder-b");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");

        let (ra, rb) = tokio::join!(a.create(&record), b.create(&record));

        let winners = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{ra:?} / {rb:?}");
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(
            loser,
            Err(RegistryError::Lock(LockError::Contention { .. } | LockError::Held { .. }))
        ));
        assert_eq!(a.get_all("es", None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_lock_blocks_create() {
        let store = test_store();
        let squatter = LockManager::new(Arc::clone(&store));
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");
        squatter.acquire(&record.row_key(), "holder-x").await.unwrap();
        store
            .delete_row(ColumnFamily::Locks, &choosing_key(&record.row_key()))
            .await
            .unwrap();

        let err = registry(&store, "holder-a").create(&record).await.unwrap_err();

        assert!(matches!(err, RegistryError::Lock(LockError::Held { ref holder, .. }) if holder == "holder-x"));
        assert!(store.scan(ColumnFamily::Instances).await.unwrap().is_empty());
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn delete_then_create_again() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");

        reg.create(&record).await.unwrap();
        reg.delete(&record).await.unwrap();

        assert!(reg.find("es", "i-1", "dc").await.unwrap().is_none());
        assert!(store.scan(ColumnFamily::Locks).await.unwrap().is_empty());

        // Choosing column TTL has not elapsed, yet re-registration works.
        reg.create(&record).await.unwrap();
        assert_eq!(reg.get_all("es", None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_can_delete_dead_instance() {
        let store = test_store();
        let dead = registry(&store, "holder-dead");
        let survivor = registry(&store, "holder-live");
        let record = test_record("es", "dc", "i-dead", "a", "10.0.0.9");
        dead.create(&record).await.unwrap();

        survivor.delete(&record).await.unwrap();

        assert!(survivor.get_all("es", None).await.unwrap().is_empty());
        // A new claimant can take the id.
        survivor.create(&record).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delete_missing_record_is_noop() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        reg.delete(&test_record("es", "dc", "ghost", "a", "10.0.0.1"))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_clears_previous_process_claim() {
        let (now, store) = clocked_store(1_000);
        let previous = registry(&store, "holder-old");
        let current = registry(&store, "holder-new");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");
        previous.create(&record).await.unwrap();

        // Restart: the previous process's choosing entry has expired.
        now.store(8_000, Ordering::SeqCst);
        assert!(current.reclaim(&record).await.unwrap());
        current.create(&record).await.unwrap();

        assert!(!current.reclaim(&test_record("es", "dc", "i-2", "a", "10.0.0.2")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_leaves_fresh_claim_alone() {
        let (now, store) = clocked_store(1_000);
        let winner = registry(&store, "holder-a");
        let loser = registry(&store, "holder-b");
        let record = test_record("es", "dc", "i-1", "a", "10.0.0.1");
        winner.create(&record).await.unwrap();

        now.store(3_000, Ordering::SeqCst);
        assert!(!loser.reclaim(&record).await.unwrap());

        assert!(matches!(
            loser.create(&record).await,
            Err(RegistryError::DuplicateRegistration(_))
        ));
        let row = store
            .get_row(ColumnFamily::Instances, &record.row_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value(COL_HOLDER), Some("holder-a"));
        assert!(
            store
                .get_row(ColumnFamily::Locks, &lock_key(&record.row_key()))
                .await
                .unwrap()
                .is_some()
        );
    }

    // ── Queries ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn get_all_filters_and_sorts() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        for record in [
            test_record("es", "us-east-1", "i-3", "us-east-1b", "10.0.0.3"),
            test_record("es", "us-east-1", "i-2", "us-east-1a", "10.0.0.2"),
            test_record("es", "eu-west-1", "i-9", "eu-west-1a", "10.1.0.9"),
            test_record("es", "us-east-1", "i-1", "us-east-1b", "10.0.0.1"),
            test_record("other", "us-east-1", "i-7", "us-east-1a", "10.0.0.7"),
        ] {
            reg.create(&record).await.unwrap();
        }

        let all = reg.get_all("es", None).await.unwrap();
        let ids: Vec<String> = all.iter().map(InstanceRecord::logical_id).collect();
        assert_eq!(
            ids,
            vec![
                "eu-west-1.i-9",
                "us-east-1.i-2",
                "us-east-1.i-1",
                "us-east-1.i-3",
            ]
        );

        let scoped = reg.get_all("es", Some("us-east-1")).await.unwrap();
        assert_eq!(scoped.len(), 3);
        assert!(scoped.iter().all(|r| r.datacenter == "us-east-1"));

        assert!(reg.get_all("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn get_all_skips_corrupt_rows() {
        let store = test_store();
        let reg = registry(&store, "holder-a");
        reg.create(&test_record("es", "dc", "i-1", "a", "10.0.0.1"))
            .await
            .unwrap();
        store
            .put_columns(ColumnFamily::Instances, "es_dc_broken", &[("cluster", "es")], None)
            .await
            .unwrap();

        let all = reg.get_all("es", None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_propagation_wait_is_honored_by_create() {
        let store = test_store();
        let locks = LockManager::new(Arc::clone(&store)).with_timings(crate::LockTimings {
            propagation_wait: Duration::from_millis(250),
            ..Default::default()
        });
        let reg = InstanceRegistry::new(Arc::clone(&store), locks, "holder-a");
        let start = tokio::time::Instant::now();

        reg.create(&test_record("es", "dc", "i-1", "a", "10.0.0.1"))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
