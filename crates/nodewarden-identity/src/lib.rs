//! nodewarden-identity — gives this node its place in the registry.
//!
//! On startup the [`IdentityService`] first removes records of peers the
//! cloud no longer reports as alive, then registers this node under its
//! logical id `{datacenter}.{instance_id}`, retrying within a bounded policy.

pub mod error;
pub mod provider;
pub mod service;

pub use error::{IdentityError, IdentityResult};
pub use provider::{MembershipProvider, StaticFleet};
pub use service::IdentityService;
