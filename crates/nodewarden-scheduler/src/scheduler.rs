//! TaskScheduler — owns registered tasks and their timer loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{Task, TaskContext};
use crate::timer::TimerPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Created,
    Running,
    Stopped,
}

/// A task with a live timer loop.
struct TaskSlot {
    generation: u64,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// A task waiting for `start()`.
struct Registration {
    task: Arc<dyn Task>,
    timer: TimerPolicy,
}

#[derive(Default)]
struct SchedulerState {
    phase: Phase,
    slots: HashMap<String, TaskSlot>,
    pending: HashMap<String, Registration>,
    /// name → (generation, waiter) for `add_task_with_delay`.
    delayed: HashMap<String, (u64, JoinHandle<()>)>,
    /// Held by a running execution; shared by every registration of a name.
    gates: HashMap<String, Arc<Mutex<()>>>,
}

struct Inner {
    state: RwLock<SchedulerState>,
    /// Wakes delayed waiters on shutdown.
    shutdown_tx: watch::Sender<bool>,
    generations: AtomicU64,
}

/// Periodic, delayed and cron-like task runner.
///
/// Cheap to clone; clones share the same set of tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SchedulerState::default()),
                shutdown_tx,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Launch timer loops for every task registered so far.
    pub async fn start(&self) {
        let mut state = self.inner.state.write().await;
        match state.phase {
            Phase::Running => return,
            Phase::Stopped => {
                warn!("start() called on a shut down scheduler");
                return;
            }
            Phase::Created => {}
        }
        state.phase = Phase::Running;

        let pending: Vec<(String, Registration)> = state.pending.drain().collect();
        let count = pending.len();
        for (name, registration) in pending {
            self.inner
                .launch(&mut state, &name, registration.task, registration.timer);
        }
        info!(tasks = count, "scheduler started");
    }

    /// Stop every timer loop and delayed waiter. In-flight executions are
    /// left to finish on their own; no new firings happen afterwards.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.inner.state.write().await;
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            self.inner.shutdown_tx.send_replace(true);

            for (name, (_, waiter)) in state.delayed.drain() {
                waiter.abort();
                debug!(task = %name, "delayed registration dropped");
            }
            state.pending.clear();
            state
                .slots
                .drain()
                .map(|(name, slot)| {
                    let _ = slot.shutdown_tx.send(true);
                    (name, slot.handle)
                })
                .collect()
        };

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(task = %name, error = %e, "task loop ended abnormally");
                }
            }
        }
        info!("scheduler shut down");
    }

    /// Register `task` under `name`, replacing any task of the same name.
    ///
    /// An execution of the replaced task that is still running finishes
    /// before the new registration's first execution starts.
    pub async fn add_task(
        &self,
        name: &str,
        task: Arc<dyn Task>,
        timer: TimerPolicy,
    ) -> SchedulerResult<()> {
        validate(name, &timer)?;
        let mut state = self.inner.state.write().await;
        if let Some((_, waiter)) = state.delayed.remove(name) {
            waiter.abort();
        }
        self.inner.register(&mut state, name, task, timer)
    }

    /// Register `task` after `delay`, without blocking the caller.
    ///
    /// Until the delay elapses the task is not scheduled and
    /// [`is_scheduled`](Self::is_scheduled) reports `false`.
    pub async fn add_task_with_delay(
        &self,
        name: &str,
        task: Arc<dyn Task>,
        timer: TimerPolicy,
        delay: Duration,
    ) -> SchedulerResult<()> {
        validate(name, &timer)?;
        let mut state = self.inner.state.write().await;
        if state.phase == Phase::Stopped {
            return Err(SchedulerError::ShutDown(name.to_string()));
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let waiter = tokio::spawn(wait_then_register(
            Arc::downgrade(&self.inner),
            name.to_string(),
            generation,
            task,
            timer,
            delay,
            self.inner.shutdown_tx.subscribe(),
        ));
        if let Some((_, old)) = state.delayed.insert(name.to_string(), (generation, waiter)) {
            old.abort();
        }
        info!(task = %name, ?delay, "task registration delayed");
        Ok(())
    }

    /// Execute `task` once, immediately, in the caller's context.
    ///
    /// Independent of any registration under the same name; a cancel
    /// requested by the task is ignored.
    pub async fn run_task_now(&self, task: &dyn Task) -> SchedulerResult<()> {
        let name = task.name().to_string();
        if self.inner.state.read().await.phase == Phase::Stopped {
            return Err(SchedulerError::ShutDown(name));
        }

        info!(task = %name, "running task now");
        let ctx = TaskContext::one_shot(&name);
        match task.execute(&ctx).await {
            Ok(()) => {
                debug!(task = %name, "task completed");
                Ok(())
            }
            Err(source) => {
                error!(task = %name, error = %source, "task failed");
                Err(SchedulerError::TaskFailed { name, source })
            }
        }
    }

    /// Unregister `name`, including a pending or delayed registration.
    /// Returns whether anything was removed.
    pub async fn delete_task(&self, name: &str) -> bool {
        let mut state = self.inner.state.write().await;
        let mut removed = state.pending.remove(name).is_some();
        if let Some((_, waiter)) = state.delayed.remove(name) {
            waiter.abort();
            removed = true;
        }
        if let Some(slot) = state.slots.remove(name) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            removed = true;
        }
        if removed {
            info!(task = %name, "task deleted");
        }
        removed
    }

    /// Whether `name` currently has a running timer loop.
    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.inner.state.read().await.slots.contains_key(name)
    }

    /// Names of tasks with a running timer loop, sorted.
    pub async fn task_names(&self) -> Vec<String> {
        let state = self.inner.state.read().await;
        let mut names: Vec<String> = state.slots.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Inner {
    fn register(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        name: &str,
        task: Arc<dyn Task>,
        timer: TimerPolicy,
    ) -> SchedulerResult<()> {
        match state.phase {
            Phase::Stopped => Err(SchedulerError::ShutDown(name.to_string())),
            Phase::Created => {
                debug!(task = %name, %timer, "task registered, waiting for start");
                state
                    .pending
                    .insert(name.to_string(), Registration { task, timer });
                Ok(())
            }
            Phase::Running => {
                self.launch(state, name, task, timer);
                Ok(())
            }
        }
    }

    fn launch(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        name: &str,
        task: Arc<dyn Task>,
        timer: TimerPolicy,
    ) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gate = Arc::clone(state.gates.entry(name.to_string()).or_default());
        info!(task = %name, %timer, "task scheduled");

        let handle = tokio::spawn(run_task_loop(
            TaskLoop {
                name: name.to_string(),
                task,
                timer,
                ctx: TaskContext::scheduled(name),
                gate,
                generation,
                scheduler: Arc::downgrade(self),
            },
            shutdown_rx,
        ));

        if let Some(old) = state.slots.insert(
            name.to_string(),
            TaskSlot {
                generation,
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
            debug!(task = %name, "replaced previous registration");
        }
    }
}

fn validate(name: &str, timer: &TimerPolicy) -> SchedulerResult<()> {
    timer.validate().map_err(|reason| SchedulerError::InvalidTimer {
        name: name.to_string(),
        reason,
    })
}

async fn wait_then_register(
    scheduler: Weak<Inner>,
    name: String,
    generation: u64,
    task: Arc<dyn Task>,
    timer: TimerPolicy,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {
            debug!(task = %name, "delayed registration cancelled by shutdown");
            return;
        }
    }

    let Some(inner) = scheduler.upgrade() else {
        return;
    };
    let mut state = inner.state.write().await;
    if state.delayed.get(&name).map(|(g, _)| *g) != Some(generation) {
        debug!(task = %name, "delayed registration superseded");
        return;
    }
    state.delayed.remove(&name);
    if let Err(e) = inner.register(&mut state, &name, task, timer) {
        warn!(task = %name, error = %e, "delayed registration rejected");
    }
}

struct TaskLoop {
    name: String,
    task: Arc<dyn Task>,
    timer: TimerPolicy,
    ctx: TaskContext,
    gate: Arc<Mutex<()>>,
    generation: u64,
    scheduler: Weak<Inner>,
}

/// Timer loop for one registration.
async fn run_task_loop(lp: TaskLoop, mut shutdown: watch::Receiver<bool>) {
    let name = lp.name.as_str();
    let mut due = Instant::now() + lp.timer.first_delay();
    debug!(task = %name, "task loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(due) => {}
            _ = shutdown.changed() => {
                debug!(task = %name, "task loop shutting down");
                return;
            }
        }

        // Wait out an execution left running by a replaced registration.
        let running = tokio::select! {
            guard = Arc::clone(&lp.gate).lock_owned() => guard,
            _ = shutdown.changed() => {
                debug!(task = %name, "task loop shutting down");
                return;
            }
        };

        // The execution outlives an aborted loop, so it owns the guard.
        let execution = {
            let task = Arc::clone(&lp.task);
            let ctx = lp.ctx.clone();
            tokio::spawn(async move {
                let _running = running;
                task.execute(&ctx).await
            })
        };
        tokio::select! {
            outcome = execution => log_outcome(name, outcome),
            _ = shutdown.changed() => {
                debug!(task = %name, "task loop shutting down during execution");
                return;
            }
        }

        if lp.ctx.is_cancelled() {
            info!(task = %name, "task cancelled itself");
            if let Some(inner) = lp.scheduler.upgrade() {
                let mut state = inner.state.write().await;
                if state
                    .slots
                    .get(name)
                    .is_some_and(|slot| slot.generation == lp.generation)
                {
                    state.slots.remove(name);
                }
            }
            return;
        }

        due = lp.timer.next_deadline(due, Instant::now());
    }
}

fn log_outcome(name: &str, outcome: Result<anyhow::Result<()>, JoinError>) {
    match outcome {
        Ok(Ok(())) => debug!(task = %name, "task completed"),
        Ok(Err(e)) => error!(task = %name, error = %e, "task failed"),
        Err(e) if e.is_panic() => error!(task = %name, "task panicked"),
        Err(e) => warn!(task = %name, error = %e, "task execution aborted"),
    }
}
