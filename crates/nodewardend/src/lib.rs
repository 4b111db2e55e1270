//! nodewardend — assembles the sidecar from configuration.
//!
//! # Startup order
//!
//! ```text
//! IdentityService::start      deregister dead peers, register self (fatal on failure)
//! TaskScheduler::start
//! run_task_now(reconciler)    first firewall convergence
//! settle delay                only if that run changed the firewall
//! reconciler scheduled        every interval, first firing jittered
//! ```

pub mod startup;

pub use startup::{Sidecar, StartupReport};
