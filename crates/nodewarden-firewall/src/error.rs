//! Firewall reconciliation error types.

use std::time::Duration;

use nodewarden_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirewallError {
    /// The cloud firewall API rejected the call or did not answer in time.
    #[error("firewall api {operation} failed: {reason}")]
    ApiFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("membership lookup for {cluster} failed: {source}")]
    Membership {
        cluster: String,
        #[source]
        source: RegistryError,
    },
}

impl FirewallError {
    pub(crate) fn timed_out(operation: &'static str, after: Duration) -> Self {
        FirewallError::ApiFailed {
            operation,
            reason: format!("timed out after {after:?}"),
        }
    }
}

pub type FirewallResult<T> = Result<T, FirewallError>;
