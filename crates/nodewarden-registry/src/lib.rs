//! nodewarden-registry — the shared registry of cluster members.
//!
//! # Architecture
//!
//! ```text
//! InstanceRegistry
//!   ├── create()  → duplicate check, LockManager::acquire, write columns
//!   ├── delete()  → find row, re-acquire for the row's holder, delete row + lock rows
//!   ├── get_all() → scan, filter by cluster (and datacenter), sort by (zone, logical id)
//!   └── find()    → locate the physical row key
//!
//! LockManager (two-phase, best effort)
//!   ├── "{key}-choosing"  short TTL, detects concurrent claimants
//!   └── "{key}-lock"      long TTL, records the holder
//! ```
//!
//! The lock is not linearizable. Claimants whose writes land within the
//! store's propagation delay of each other can both observe success; the
//! fixed propagation wait only narrows that window.

pub mod error;
pub mod lock;
pub mod record;
pub mod registry;

pub use error::{LockError, LockResult, RegistryError, RegistryResult};
pub use lock::{LockManager, LockTimings};
pub use record::InstanceRecord;
pub use registry::InstanceRegistry;
