//! IdentityService — startup registration and dead peer cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use nodewarden_core::{RetryPolicy, retry};
use nodewarden_registry::{InstanceRecord, InstanceRegistry, RegistryError};

use crate::error::{IdentityError, IdentityResult};
use crate::provider::MembershipProvider;

pub struct IdentityService {
    registry: Arc<InstanceRegistry>,
    membership: Arc<dyn MembershipProvider>,
    /// This node's record as derived from configuration.
    local: InstanceRecord,
    retry_policy: RetryPolicy,
    single_datacenter: bool,
    dead_peer_cleanup: bool,
    /// Record read back after a successful registration.
    registered: RwLock<Option<InstanceRecord>>,
}

impl IdentityService {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        membership: Arc<dyn MembershipProvider>,
        local: InstanceRecord,
    ) -> Self {
        Self {
            registry,
            membership,
            local,
            retry_policy: RetryPolicy::new(5, std::time::Duration::from_secs(1)),
            single_datacenter: false,
            dead_peer_cleanup: true,
            registered: RwLock::new(None),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Scope `all_instances` to this node's datacenter.
    pub fn with_single_datacenter(mut self, single_datacenter: bool) -> Self {
        self.single_datacenter = single_datacenter;
        self
    }

    /// Turn dead peer cleanup in `start` off, for membership providers that
    /// cannot vouch for the rest of the fleet.
    pub fn with_dead_peer_cleanup(mut self, enabled: bool) -> Self {
        self.dead_peer_cleanup = enabled;
        self
    }

    pub fn logical_id(&self) -> String {
        self.local.logical_id()
    }

    /// Deregister dead peers (best effort), then register this node.
    ///
    /// Only a failed self registration is an error; the caller is expected
    /// to abort startup on it.
    pub async fn start(&self) -> IdentityResult<InstanceRecord> {
        if self.dead_peer_cleanup {
            match self.deregister_dead_peers().await {
                Ok(removed) if !removed.is_empty() => {
                    info!(count = removed.len(), ?removed, "dead peers deregistered");
                }
                Ok(_) => debug!("no dead peers found"),
                Err(e) => warn!(error = %e, "dead peer cleanup skipped"),
            }
        } else {
            debug!("dead peer cleanup disabled");
        }
        self.register_self().await
    }

    /// Delete registry records in this datacenter whose instance the
    /// membership provider no longer reports as alive.
    ///
    /// Never touches this node's own record. Groups whose membership query
    /// fails are left alone. Returns the logical ids that were removed.
    pub async fn deregister_dead_peers(&self) -> IdentityResult<Vec<String>> {
        let records = self.registry.get_all(&self.local.cluster_name, None).await?;

        let mut by_group: BTreeMap<&str, Vec<&InstanceRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| {
            r.datacenter == self.local.datacenter && r.instance_id != self.local.instance_id
        }) {
            by_group.entry(record.asg_name.as_str()).or_default().push(record);
        }

        let mut removed = Vec::new();
        for (group, candidates) in by_group {
            let live = match self.membership.list_live_instance_ids(group).await {
                Ok(live) => live,
                Err(e) => {
                    warn!(%group, error = %e, "membership query failed, keeping group records");
                    continue;
                }
            };

            for record in candidates {
                if live.contains(&record.instance_id) {
                    continue;
                }
                let logical_id = record.logical_id();
                match self.registry.delete(record).await {
                    Ok(()) => {
                        info!(%logical_id, %group, "deregistered dead peer");
                        removed.push(logical_id);
                    }
                    Err(e) => warn!(%logical_id, error = %e, "failed to deregister dead peer"),
                }
            }
        }
        Ok(removed)
    }

    /// Register this node, replacing a registration left by a previous
    /// process on the same instance.
    ///
    /// The stale row is cleared once, up front; only `create` is retried, so
    /// a claimant that loses a race ends in `DuplicateRegistration` or a lock
    /// error instead of overwriting the winner.
    pub async fn register_self(&self) -> IdentityResult<InstanceRecord> {
        let logical_id = self.local.logical_id();
        let id = logical_id.as_str();
        let registry = &self.registry;
        let local = &self.local;

        if let Err(e) = registry.reclaim(local).await {
            warn!(%logical_id, error = %e, "could not clear previous registration");
        }

        retry(
            &self.retry_policy,
            "register_self",
            RegistryError::is_retryable,
            |attempt| async move {
                debug!(logical_id = %id, attempt, "registering");
                registry.create(local).await
            },
        )
        .await
        .map_err(|source| IdentityError::RegistrationFailed {
            logical_id: logical_id.clone(),
            source,
        })?;

        let stored = match self
            .registry
            .get(&local.cluster_name, &local.instance_id, &local.datacenter)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => local.clone(),
            Err(e) => {
                warn!(%logical_id, error = %e, "could not read back own record");
                local.clone()
            }
        };
        *self.registered.write().await = Some(stored.clone());
        info!(%logical_id, ip = %stored.public_ip, "registered self");
        Ok(stored)
    }

    /// This node's registered record, once `start` succeeded.
    pub async fn self_record(&self) -> Option<InstanceRecord> {
        self.registered.read().await.clone()
    }

    /// Every record of this node's cluster, sorted by zone then logical id.
    pub async fn all_instances(&self) -> IdentityResult<Vec<InstanceRecord>> {
        let datacenter = self
            .single_datacenter
            .then_some(self.local.datacenter.as_str());
        Ok(self
            .registry
            .get_all(&self.local.cluster_name, datacenter)
            .await?)
    }
}
