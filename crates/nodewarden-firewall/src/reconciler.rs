//! SecurityGroupReconciler — converges the firewall to live membership.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use nodewarden_core::CoordinatorState;
use nodewarden_scheduler::{Task, TaskContext};

use crate::acl::{FirewallApi, host_cidr};
use crate::directory::ClusterDirectory;
use crate::error::{FirewallError, FirewallResult};

/// Ranges changed by one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

pub struct SecurityGroupReconciler {
    firewall: Arc<dyn FirewallApi>,
    directory: Arc<dyn ClusterDirectory>,
    coordinator: Arc<CoordinatorState>,
    cluster: String,
    linked_clusters: Vec<String>,
    from_port: u16,
    to_port: u16,
    api_timeout: Duration,
    /// Executions started, scheduled or not.
    runs: AtomicU64,
}

impl SecurityGroupReconciler {
    pub const NAME: &'static str = "security-group-reconciler";

    pub fn new(
        firewall: Arc<dyn FirewallApi>,
        directory: Arc<dyn ClusterDirectory>,
        coordinator: Arc<CoordinatorState>,
        cluster: impl Into<String>,
        from_port: u16,
        to_port: u16,
    ) -> Self {
        Self {
            firewall,
            directory,
            coordinator,
            cluster: cluster.into(),
            linked_clusters: Vec::new(),
            from_port,
            to_port,
            api_timeout: Duration::from_secs(10),
            runs: AtomicU64::new(0),
        }
    }

    /// Also admit the members of these clusters.
    pub fn with_linked_clusters(mut self, clusters: Vec<String>) -> Self {
        self.linked_clusters = clusters;
        self
    }

    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    /// `{ip/32}` over every member of the own and linked clusters.
    ///
    /// Any failed lookup fails the whole computation, so a partial view
    /// never leads to removals.
    pub async fn desired_ranges(&self) -> FirewallResult<BTreeSet<String>> {
        let mut desired = BTreeSet::new();
        for cluster in std::iter::once(&self.cluster).chain(&self.linked_clusters) {
            for record in self.directory.members(cluster).await? {
                if record.public_ip.trim().is_empty() {
                    warn!(
                        logical_id = %record.logical_id(),
                        %cluster,
                        "registered instance has no ip, not admitted"
                    );
                    continue;
                }
                desired.insert(host_cidr(record.public_ip.trim()));
            }
        }
        Ok(desired)
    }

    /// One reconciliation pass: add missing ranges, then remove stale ones.
    pub async fn reconcile(&self) -> FirewallResult<ReconcileReport> {
        let (from_port, to_port) = (self.from_port, self.to_port);
        let current: BTreeSet<String> = self
            .bounded("list_acl", self.firewall.list_acl(from_port, to_port))
            .await?
            .into_iter()
            .filter(|e| e.from_port == from_port && e.to_port == to_port)
            .map(|e| e.cidr)
            .collect();
        let desired = self.desired_ranges().await?;

        let report = ReconcileReport {
            added: desired.difference(&current).cloned().collect(),
            removed: current.difference(&desired).cloned().collect(),
        };

        if !report.added.is_empty() {
            self.bounded(
                "add_acl",
                self.firewall.add_acl(&report.added, from_port, to_port),
            )
            .await?;
            self.coordinator.mark_firewall_updated();
            info!(ranges = ?report.added, from_port, to_port, "firewall ranges added");
        }
        if !report.removed.is_empty() {
            self.bounded(
                "remove_acl",
                self.firewall.remove_acl(&report.removed, from_port, to_port),
            )
            .await?;
            self.coordinator.mark_firewall_updated();
            info!(ranges = ?report.removed, from_port, to_port, "firewall ranges removed");
        }
        if !report.changed() {
            debug!(ranges = desired.len(), "firewall already converged");
        }
        Ok(report)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = FirewallResult<T>>,
    ) -> FirewallResult<T> {
        tokio::time::timeout(self.api_timeout, call)
            .await
            .unwrap_or_else(|_| Err(FirewallError::timed_out(operation, self.api_timeout)))
    }
}

#[async_trait]
impl Task for SecurityGroupReconciler {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Non-coordinator nodes reconcile at most once and then drop the
    /// periodic registration.
    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let coordinator = self.coordinator.is_master();
        if !coordinator && self.runs.load(Ordering::Acquire) > 0 {
            info!("not the coordinator, leaving periodic reconciliation to it");
            ctx.cancel();
            return Ok(());
        }

        self.runs.fetch_add(1, Ordering::AcqRel);
        let outcome = self.reconcile().await;
        if !coordinator {
            ctx.cancel();
        }
        outcome?;
        Ok(())
    }
}
