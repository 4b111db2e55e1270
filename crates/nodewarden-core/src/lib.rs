pub mod config;
pub mod coordinator;
pub mod retry;
pub mod time;

pub use config::NodewardenConfig;
pub use coordinator::CoordinatorState;
pub use retry::{retry, Backoff, RetryError, RetryPolicy};
