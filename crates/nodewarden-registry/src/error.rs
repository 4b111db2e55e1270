//! Registry and lock error types.

use nodewarden_store::StoreError;
use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// Two or more claimants raced for the same id.
    #[error("lock contention on {lock_id}")]
    Contention { lock_id: String },

    #[error("{lock_id} is held by {holder}")]
    Held { lock_id: String, holder: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("instance already registered: {0}")]
    DuplicateRegistration(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt registry row {key}: {reason}")]
    CorruptRow { key: String, reason: String },
}

impl RegistryError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RegistryError::CorruptRow { .. }
                | RegistryError::Store(StoreError::Serialize(_) | StoreError::Deserialize(_))
                | RegistryError::Lock(LockError::Store(
                    StoreError::Serialize(_) | StoreError::Deserialize(_)
                ))
        )
    }

    /// True when the backing store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RegistryError::Store(StoreError::Unavailable(_))
                | RegistryError::Lock(LockError::Store(StoreError::Unavailable(_)))
        )
    }
}
