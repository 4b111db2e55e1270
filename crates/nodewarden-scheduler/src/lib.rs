//! nodewarden-scheduler — runs the sidecar's periodic and delayed work.
//!
//! # Architecture
//!
//! ```text
//! TaskScheduler
//!   ├── pending   (registered before start())
//!   ├── delayed   (add_task_with_delay waiters)
//!   └── Per-task slot
//!       ├── loop: sleep until next firing → execute → compute next firing
//!       └── watch channel for shutdown / replacement
//! ```
//!
//! A task never overlaps with itself: the next firing is computed only after
//! the previous execution returned. Different tasks run concurrently.

pub mod error;
pub mod scheduler;
pub mod task;
pub mod timer;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::TaskScheduler;
pub use task::{Task, TaskContext};
pub use timer::{CronSchedule, TimerPolicy};
