//! Sidecar wiring and the startup sequence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use nodewarden_core::{CoordinatorState, NodewardenConfig};
use nodewarden_firewall::{
    ClusterDirectory, FirewallApi, InMemoryFirewall, RegistryDirectory, SecurityGroupReconciler,
};
use nodewarden_identity::{IdentityService, MembershipProvider, StaticFleet};
use nodewarden_registry::{InstanceRecord, InstanceRegistry, LockManager, LockTimings};
use nodewarden_scheduler::{TaskScheduler, TimerPolicy};
use nodewarden_store::{BoundedStore, QuorumStore, RedbStore};

/// Outcome of a successful startup.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub record: InstanceRecord,
    /// The startup reconciliation changed the firewall.
    pub firewall_updated: bool,
    /// Delay before periodic reconciliation was registered.
    pub settle_delay: Duration,
}

/// Every long-lived component of one sidecar process.
pub struct Sidecar {
    config: NodewardenConfig,
    coordinator: Arc<CoordinatorState>,
    registry: Arc<InstanceRegistry>,
    identity: Arc<IdentityService>,
    reconciler: Arc<SecurityGroupReconciler>,
    scheduler: TaskScheduler,
}

impl Sidecar {
    /// Build from configuration alone: redb store (on disk when
    /// `store.path` is set), the configured static fleet, and the
    /// process-local firewall.
    ///
    /// With an empty `fleet.live_instances` the static fleet knows only this
    /// node, so dead peer cleanup is turned off instead of removing everyone.
    pub fn from_config(config: NodewardenConfig) -> anyhow::Result<Self> {
        let redb = match &config.store.path {
            Some(path) => RedbStore::open(Path::new(path))
                .with_context(|| format!("opening store at {path}"))?,
            None => RedbStore::open_in_memory().context("opening in-memory store")?,
        };
        let store: Arc<dyn QuorumStore> =
            Arc::new(BoundedStore::new(redb, config.store.timeout()));

        let fleet_known = !config.fleet.live_instances.is_empty();
        if !fleet_known {
            warn!("fleet.live_instances is empty, dead peer cleanup disabled");
        }
        let mut live = config.fleet.live_instances.clone();
        live.push(config.node.instance_id.clone());
        let membership = Arc::new(StaticFleet::new(live));

        Ok(Self::wire(
            config,
            store,
            membership,
            Arc::new(InMemoryFirewall::new()),
            fleet_known,
        ))
    }

    /// Wire components around the given collaborators.
    pub fn assemble(
        config: NodewardenConfig,
        store: Arc<dyn QuorumStore>,
        membership: Arc<dyn MembershipProvider>,
        firewall: Arc<dyn FirewallApi>,
    ) -> Self {
        Self::wire(config, store, membership, firewall, true)
    }

    fn wire(
        config: NodewardenConfig,
        store: Arc<dyn QuorumStore>,
        membership: Arc<dyn MembershipProvider>,
        firewall: Arc<dyn FirewallApi>,
        dead_peer_cleanup: bool,
    ) -> Self {
        let holder = config.node.claimant_token();
        let locks = LockManager::new(Arc::clone(&store)).with_timings(LockTimings {
            choosing_ttl: config.lock.choosing_ttl(),
            lock_ttl: config.lock.lock_ttl(),
            propagation_wait: config.lock.propagation_wait(),
        });
        let registry = Arc::new(InstanceRegistry::new(store, locks, holder));

        let identity = Arc::new(
            IdentityService::new(
                Arc::clone(&registry),
                membership,
                local_record(&config),
            )
            .with_retry_policy(config.registration.retry_policy())
            .with_single_datacenter(config.store.single_datacenter)
            .with_dead_peer_cleanup(dead_peer_cleanup),
        );

        let coordinator = Arc::new(CoordinatorState::new(config.coordinator.master));
        let mut directory = RegistryDirectory::new(Arc::clone(&registry));
        if config.store.single_datacenter {
            directory = directory.with_datacenter(config.node.datacenter.clone());
        }
        let directory: Arc<dyn ClusterDirectory> = Arc::new(directory);
        let reconciler = Arc::new(
            SecurityGroupReconciler::new(
                firewall,
                directory,
                Arc::clone(&coordinator),
                config.node.cluster.clone(),
                config.firewall.from_port,
                config.firewall.to_port,
            )
            .with_linked_clusters(config.firewall.linked_clusters.clone())
            .with_api_timeout(config.firewall.api_timeout()),
        );

        Self {
            config,
            coordinator,
            registry,
            identity,
            reconciler,
            scheduler: TaskScheduler::new(),
        }
    }

    /// Run the startup sequence. An error means the node must not serve.
    pub async fn start(&self) -> anyhow::Result<StartupReport> {
        info!(
            cluster = %self.config.node.cluster,
            logical_id = %self.identity.logical_id(),
            holder = %self.registry.holder(),
            master = self.coordinator.is_master(),
            "sidecar starting"
        );

        let record = self
            .identity
            .start()
            .await
            .context("self registration failed")?;

        self.scheduler.start().await;

        if let Err(e) = self.scheduler.run_task_now(self.reconciler.as_ref()).await {
            warn!(error = %e, "startup firewall reconciliation failed");
        }

        let firewall_updated = self.coordinator.firewall_updated();
        let settle_delay = if firewall_updated {
            Duration::from_secs(self.config.firewall.settle_secs)
        } else {
            Duration::ZERO
        };

        let timer = TimerPolicy::every(Duration::from_secs(self.config.firewall.interval_secs))
            .with_jitter(Duration::from_secs(self.config.firewall.jitter_secs));
        self.scheduler
            .add_task_with_delay(
                SecurityGroupReconciler::NAME,
                self.reconciler.clone(),
                timer,
                settle_delay,
            )
            .await?;

        info!(%firewall_updated, ?settle_delay, "sidecar started");
        Ok(StartupReport {
            record,
            firewall_updated,
            settle_delay,
        })
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("sidecar stopped");
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &CoordinatorState {
        &self.coordinator
    }
}

fn local_record(config: &NodewardenConfig) -> InstanceRecord {
    let node = &config.node;
    InstanceRecord {
        cluster_name: node.cluster.clone(),
        datacenter: node.datacenter.clone(),
        instance_id: node.instance_id.clone(),
        hostname: node.hostname.clone(),
        public_ip: node.public_ip.clone(),
        availability_zone: node.availability_zone.clone(),
        asg_name: node.asg_name.clone(),
        update_time: None,
        attached_volumes: Default::default(),
    }
}
