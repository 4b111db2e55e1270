//! Cluster membership lookups for the reconciler.

use std::sync::Arc;

use async_trait::async_trait;

use nodewarden_registry::{InstanceRecord, InstanceRegistry};

use crate::error::{FirewallError, FirewallResult};

/// Resolves a cluster name to its registered members.
///
/// Used for the node's own cluster and for linked clusters whose members
/// must also reach this cluster's ports.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    async fn members(&self, cluster: &str) -> FirewallResult<Vec<InstanceRecord>>;
}

/// Directory backed by the shared instance registry.
pub struct RegistryDirectory {
    registry: Arc<InstanceRegistry>,
    /// Restrict lookups to one datacenter.
    datacenter: Option<String>,
}

impl RegistryDirectory {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            registry,
            datacenter: None,
        }
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }
}

#[async_trait]
impl ClusterDirectory for RegistryDirectory {
    async fn members(&self, cluster: &str) -> FirewallResult<Vec<InstanceRecord>> {
        self.registry
            .get_all(cluster, self.datacenter.as_deref())
            .await
            .map_err(|source| FirewallError::Membership {
                cluster: cluster.to_string(),
                source,
            })
    }
}
