//! The unit of scheduled work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Periodic or one-shot work driven by the [`TaskScheduler`](crate::TaskScheduler).
///
/// Errors returned from `execute` are logged by the scheduler and never
/// unschedule the task. To stop itself a task calls [`TaskContext::cancel`].
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Per-registration handle passed to every execution of a task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    name: Arc<str>,
    cancelled: Arc<AtomicBool>,
    scheduled: bool,
}

impl TaskContext {
    pub(crate) fn scheduled(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            cancelled: Arc::new(AtomicBool::new(false)),
            scheduled: true,
        }
    }

    /// Context for a single execution outside any schedule.
    pub fn one_shot(name: &str) -> Self {
        Self {
            scheduled: false,
            ..Self::scheduled(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove this registration once the current execution returns.
    /// Irreversible; has no effect on a one-shot run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// False when running through `run_task_now`.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }
}
