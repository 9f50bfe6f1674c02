//! Scheduled background tasks with cooperative cancellation.
//!
//! Background loops (rotation, escalation sweeps, retention) run as named
//! interval tasks owned by a [`TaskSupervisor`]. Each name runs at most
//! once: a task's ticks execute sequentially inside its own loop with
//! missed ticks skipped, so two ticks of the same task can never overlap,
//! and spawning a duplicate name is refused outright.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors from the task supervisor.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A task with this name is already running.
    #[error("Task already running: {0}")]
    AlreadyRunning(String),

    /// No task with this name is running.
    #[error("Task not found: {0}")]
    NotFound(String),
}

/// Handle to a running scheduled task.
pub struct TaskHandle {
    name: String,
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Returns the task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals cancellation and waits for the loop to exit.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(task = %self.name, "Scheduled task panicked: {}", e);
        }
    }
}

/// Owns the set of named background tasks.
pub struct TaskSupervisor {
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl TaskSupervisor {
    /// Creates an empty supervisor.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns a named task that runs `tick` every `interval`.
    ///
    /// The first tick fires after one full interval, not immediately.
    /// Returns [`SchedulerError::AlreadyRunning`] if the name is taken.
    pub async fn spawn<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        mut tick: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let name = name.into();
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&name) {
            return Err(SchedulerError::AlreadyRunning(name));
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let task_name = name.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The interval's first tick completes immediately; consume it so
            // the task waits a full period before its first real tick.
            ticker.tick().await;

            info!(task = %task_name, interval_secs = interval.as_secs_f64(), "Scheduled task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = %task_name, "Scheduled task tick");
                        tick().await;
                    }
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            info!(task = %task_name, "Scheduled task stopped");
                            break;
                        }
                    }
                }
            }
        });

        tasks.insert(
            name.clone(),
            TaskHandle {
                name,
                cancel_tx,
                join,
            },
        );
        Ok(())
    }

    /// Returns the names of the currently running tasks.
    pub async fn running(&self) -> Vec<String> {
        self.tasks.lock().await.keys().cloned().collect()
    }

    /// Cancels a single task by name and waits for it to exit.
    pub async fn cancel(&self, name: &str) -> Result<(), SchedulerError> {
        let handle = self
            .tasks
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        handle.cancel().await;
        Ok(())
    }

    /// Cancels every task and waits for all loops to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<TaskHandle> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.cancel().await;
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
