//! nodewarden.toml configuration parser.
//!
//! Only `[node]` is required; every other section falls back to defaults
//! tuned for a small search cluster.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodewardenConfig {
    pub node: NodeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// Identity of the instance this sidecar runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub cluster: String,
    /// Cloud region the node lives in.
    pub datacenter: String,
    pub instance_id: String,
    pub hostname: String,
    pub public_ip: String,
    pub availability_zone: String,
    pub asg_name: String,
    /// Claimant token used for lock rows. Generated when absent.
    pub holder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// redb file. `None` keeps the store in memory.
    pub path: Option<String>,
    pub timeout_ms: u64,
    /// Scope registry queries to this node's datacenter.
    pub single_datacenter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub choosing_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub propagation_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub from_port: u16,
    pub to_port: u16,
    pub interval_secs: u64,
    /// Upper bound of the random delay added to the first periodic run.
    pub jitter_secs: u64,
    /// Pause after the startup run mutated the firewall.
    pub settle_secs: u64,
    pub api_timeout_ms: u64,
    /// Clusters whose members are also allowed through the firewall.
    pub linked_clusters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub master: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Instance ids considered alive by the bundled static provider.
    pub live_instances: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: 10_000,
            single_datacenter: false,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            choosing_ttl_secs: 6,
            lock_ttl_secs: 600,
            propagation_wait_ms: 100,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1_000,
            backoff: BackoffKind::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            from_port: 9200,
            to_port: 9300,
            interval_secs: 60,
            jitter_secs: 30,
            settle_secs: 10,
            api_timeout_ms: 10_000,
            linked_clusters: Vec::new(),
        }
    }
}

impl NodewardenConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: NodewardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and validate the result again.
    pub fn apply_overrides(
        &mut self,
        instance_id: Option<String>,
        master: bool,
    ) -> anyhow::Result<()> {
        if let Some(id) = instance_id {
            self.node.instance_id = id;
        }
        if master {
            self.coordinator.master = true;
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (field, value) in [
            ("node.cluster", &self.node.cluster),
            ("node.datacenter", &self.node.datacenter),
            ("node.instance_id", &self.node.instance_id),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{field} must not be empty");
            }
        }
        if self.firewall.from_port > self.firewall.to_port {
            anyhow::bail!(
                "firewall.from_port ({}) is greater than firewall.to_port ({})",
                self.firewall.from_port,
                self.firewall.to_port
            );
        }
        if self.registration.max_attempts == 0 {
            anyhow::bail!("registration.max_attempts must be at least 1");
        }
        Ok(())
    }
}

impl NodeConfig {
    /// Resolve the lock claimant token for this process.
    pub fn claimant_token(&self) -> String {
        match &self.holder_id {
            Some(id) => id.clone(),
            None => format!("{}-{:08x}", self.hostname, rand::random::<u32>()),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LockConfig {
    pub fn choosing_ttl(&self) -> Duration {
        Duration::from_secs(self.choosing_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn propagation_wait(&self) -> Duration {
        Duration::from_millis(self.propagation_wait_ms)
    }
}

impl RegistrationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max: Duration::from_millis(self.max_delay_ms),
            },
        };
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
            .with_backoff(backoff)
    }
}

impl FirewallConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }
}
