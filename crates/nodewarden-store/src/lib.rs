//! nodewarden-store — the quorum store shared by the registry and the locks.
//!
//! Rows are addressed by composite string keys and hold named columns.
//! Every cell records the wall-clock time it was written and, optionally,
//! when it expires. Expired cells are invisible to reads; a row whose cells
//! have all expired reads as absent.
//!
//! # Architecture
//!
//! ```text
//! QuorumStore (async trait)
//!   ├── ColumnFamily::Instances  → registry rows  "{cluster}_{dc}_{instance}"
//!   └── ColumnFamily::Locks      → lock rows      "...-lock" / "...-choosing"
//!
//! RedbStore
//!   └── one redb table per column family, rows JSON-encoded
//! ```
//!
//! `BoundedStore` wraps any implementation with a per-call deadline.
//! `RedbStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod bounded;
pub mod error;
pub mod quorum;
pub mod store;
pub mod tables;
pub mod types;

pub use bounded::BoundedStore;
pub use error::{StoreError, StoreResult};
pub use quorum::QuorumStore;
pub use store::RedbStore;
pub use types::*;
