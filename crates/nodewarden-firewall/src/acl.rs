//! ACL entries and the cloud firewall API seam.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FirewallError, FirewallResult};

/// One ingress rule: a CIDR range allowed on a port range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    pub cidr: String,
    pub from_port: u16,
    pub to_port: u16,
}

impl AclEntry {
    pub fn new(cidr: impl Into<String>, from_port: u16, to_port: u16) -> Self {
        Self {
            cidr: cidr.into(),
            from_port,
            to_port,
        }
    }
}

/// Single-host CIDR for an IPv4 address.
pub fn host_cidr(ip: &str) -> String {
    format!("{ip}/32")
}

/// Cloud firewall (security group) operations used by the reconciler.
#[async_trait]
pub trait FirewallApi: Send + Sync {
    /// Entries currently allowed on exactly `from_port..=to_port`.
    async fn list_acl(&self, from_port: u16, to_port: u16) -> FirewallResult<Vec<AclEntry>>;

    async fn add_acl(
        &self,
        ranges: &BTreeSet<String>,
        from_port: u16,
        to_port: u16,
    ) -> FirewallResult<()>;

    async fn remove_acl(
        &self,
        ranges: &BTreeSet<String>,
        from_port: u16,
        to_port: u16,
    ) -> FirewallResult<()>;
}

/// A recorded mutating call against [`InMemoryFirewall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCall {
    Add(BTreeSet<String>),
    Remove(BTreeSet<String>),
}

/// Process-local firewall used in development mode and tests.
#[derive(Debug, Default)]
pub struct InMemoryFirewall {
    entries: Mutex<BTreeSet<AclEntry>>,
    calls: Mutex<Vec<FirewallCall>>,
    failing: AtomicBool,
}

impl InMemoryFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = AclEntry>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
            ..Self::default()
        }
    }

    pub async fn entries(&self) -> Vec<AclEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Add and remove calls received so far, in order.
    pub async fn mutations(&self) -> Vec<FirewallCall> {
        self.calls.lock().await.clone()
    }

    /// Make every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn check(&self, operation: &'static str) -> FirewallResult<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(FirewallError::ApiFailed {
                operation,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallApi for InMemoryFirewall {
    async fn list_acl(&self, from_port: u16, to_port: u16) -> FirewallResult<Vec<AclEntry>> {
        self.check("list_acl")?;
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| e.from_port == from_port && e.to_port == to_port)
            .cloned()
            .collect())
    }

    async fn add_acl(
        &self,
        ranges: &BTreeSet<String>,
        from_port: u16,
        to_port: u16,
    ) -> FirewallResult<()> {
        self.check("add_acl")?;
        let mut entries = self.entries.lock().await;
        for cidr in ranges {
            entries.insert(AclEntry::new(cidr.as_str(), from_port, to_port));
        }
        self.calls.lock().await.push(FirewallCall::Add(ranges.clone()));
        debug!(count = ranges.len(), from_port, to_port, "acl entries added");
        Ok(())
    }

    async fn remove_acl(
        &self,
        ranges: &BTreeSet<String>,
        from_port: u16,
        to_port: u16,
    ) -> FirewallResult<()> {
        self.check("remove_acl")?;
        let mut entries = self.entries.lock().await;
        entries.retain(|e| {
            !(e.from_port == from_port && e.to_port == to_port && ranges.contains(&e.cidr))
        });
        self.calls
            .lock()
            .await
            .push(FirewallCall::Remove(ranges.clone()));
        debug!(count = ranges.len(), from_port, to_port, "acl entries removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(cidrs: &[&str]) -> BTreeSet<String> {
        cidrs.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn list_filters_by_port_range() {
        let firewall = InMemoryFirewall::with_entries([
            AclEntry::new("10.0.0.1/32", 9200, 9300),
            AclEntry::new("10.0.0.2/32", 22, 22),
        ]);

        let listed = firewall.list_acl(9200, 9300).await.unwrap();
        assert_eq!(listed, vec![AclEntry::new("10.0.0.1/32", 9200, 9300)]);
    }

    #[tokio::test]
    async fn add_and_remove_are_recorded() {
        let firewall = InMemoryFirewall::new();
        firewall
            .add_acl(&ranges(&["10.0.0.1/32", "10.0.0.2/32"]), 9200, 9300)
            .await
            .unwrap();
        firewall
            .remove_acl(&ranges(&["10.0.0.1/32"]), 9200, 9300)
            .await
            .unwrap();

        assert_eq!(
            firewall.entries().await,
            vec![AclEntry::new("10.0.0.2/32", 9200, 9300)]
        );
        assert_eq!(
            firewall.mutations().await,
            vec![
                FirewallCall::Add(ranges(&["10.0.0.1/32", "10.0.0.2/32"])),
                FirewallCall::Remove(ranges(&["10.0.0.1/32"])),
            ]
        );
    }

    #[tokio::test]
    async fn remove_leaves_other_port_ranges() {
        let firewall = InMemoryFirewall::with_entries([
            AclEntry::new("10.0.0.1/32", 9200, 9300),
            AclEntry::new("10.0.0.1/32", 22, 22),
        ]);
        firewall
            .remove_acl(&ranges(&["10.0.0.1/32"]), 9200, 9300)
            .await
            .unwrap();
        assert_eq!(firewall.entries().await, vec![AclEntry::new("10.0.0.1/32", 22, 22)]);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_api_error() {
        let firewall = InMemoryFirewall::new();
        firewall.set_failing(true);
        let err = firewall.list_acl(9200, 9300).await.unwrap_err();
        assert!(matches!(err, FirewallError::ApiFailed { operation: "list_acl", .. }));
    }

    #[test]
    fn host_cidr_is_single_address() {
        assert_eq!(host_cidr("10.1.2.3"), "10.1.2.3/32");
    }
}
