//! Cloud membership provider seam.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::IdentityResult;

/// Reports which instances of a fleet group are currently alive.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn list_live_instance_ids(&self, group: &str) -> IdentityResult<HashSet<String>>;
}

/// Membership from configuration, for development and fixed fleets.
#[derive(Debug, Clone, Default)]
pub struct StaticFleet {
    live: HashSet<String>,
    groups: HashMap<String, HashSet<String>>,
}

impl StaticFleet {
    /// `live` applies to every group without its own entry.
    pub fn new(live: impl IntoIterator<Item = String>) -> Self {
        Self {
            live: live.into_iter().collect(),
            groups: HashMap::new(),
        }
    }

    pub fn with_group(
        mut self,
        group: impl Into<String>,
        live: impl IntoIterator<Item = String>,
    ) -> Self {
        self.groups.insert(group.into(), live.into_iter().collect());
        self
    }
}

#[async_trait]
impl MembershipProvider for StaticFleet {
    async fn list_live_instance_ids(&self, group: &str) -> IdentityResult<HashSet<String>> {
        Ok(self.groups.get(group).unwrap_or(&self.live).clone())
    }
}
