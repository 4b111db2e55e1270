//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid timer for task {name}: {reason}")]
    InvalidTimer { name: String, reason: String },

    #[error("scheduler is shut down, rejected task {0}")]
    ShutDown(String),

    #[error("task {name} failed: {source}")]
    TaskFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
