//! nodewarden-firewall — keeps the cloud firewall in step with membership.
//!
//! # Architecture
//!
//! ```text
//! SecurityGroupReconciler (scheduled Task)
//!   ├── FirewallApi::list_acl(from, to)     → current CIDR ranges
//!   ├── ClusterDirectory::members(cluster)  → desired {ip/32} (own + linked clusters)
//!   ├── add_acl(desired − current)
//!   └── remove_acl(current − desired)
//! ```
//!
//! Runs are idempotent: once converged, a run issues no mutating calls.

pub mod acl;
pub mod directory;
pub mod error;
pub mod reconciler;

pub use acl::{AclEntry, FirewallApi, FirewallCall, InMemoryFirewall, host_cidr};
pub use directory::{ClusterDirectory, RegistryDirectory};
pub use error::{FirewallError, FirewallResult};
pub use reconciler::{ReconcileReport, SecurityGroupReconciler};
