//! Identity lifecycle error types.

use nodewarden_core::RetryError;
use nodewarden_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("membership query for group {group} failed: {reason}")]
    MembershipQueryFailed { group: String, reason: String },

    /// Self registration did not succeed within the retry policy.
    #[error("registration of {logical_id} failed: {source}")]
    RegistrationFailed {
        logical_id: String,
        #[source]
        source: RetryError<RegistryError>,
    },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type IdentityResult<T> = Result<T, IdentityError>;
