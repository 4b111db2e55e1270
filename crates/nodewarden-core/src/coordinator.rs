//! Process-scoped coordinator flags.
//!
//! Built once at startup and shared by `Arc` with every component that
//! reads or flips them.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct CoordinatorState {
    /// This node currently runs the cluster's singleton periodic tasks.
    master: AtomicBool,
    /// A reconciliation run changed the firewall at least once.
    first_time_updated: AtomicBool,
}

impl CoordinatorState {
    pub fn new(master: bool) -> Self {
        Self {
            master: AtomicBool::new(master),
            first_time_updated: AtomicBool::new(false),
        }
    }

    pub fn is_master(&self) -> bool {
        self.master.load(Ordering::Acquire)
    }

    pub fn set_master(&self, master: bool) {
        self.master.store(master, Ordering::Release);
    }

    pub fn firewall_updated(&self) -> bool {
        self.first_time_updated.load(Ordering::Acquire)
    }

    pub fn mark_firewall_updated(&self) {
        self.first_time_updated.store(true, Ordering::Release);
    }
}
