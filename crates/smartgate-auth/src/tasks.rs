//! Periodic background maintenance.
//!
//! Stores never spawn their own cleanup loops. Anything that accumulates
//! expiring entries implements [`Sweep`], and the process lifecycle owns a
//! [`MaintenanceTasks`] set that runs each sweeper on an interval until it is
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AuthResult;

/// A component with expiring entries that can be purged.
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Removes expired entries and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails. Errors are logged by
    /// the task loop and never stop it.
    async fn sweep(&self) -> AuthResult<u64>;
}

/// A single periodic task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns a loop that sweeps `target` every `every` until `token` fires.
    ///
    /// The first sweep happens one full interval after spawning.
    #[must_use]
    pub fn spawn(target: Arc<dyn Sweep>, every: Duration, token: CancellationToken) -> Self {
        let name = target.name();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut interval = tokio::time::interval_at(start, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match target.sweep().await {
                    Ok(removed) if removed > 0 => {
                        debug!(task = name, removed, "Sweep completed");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(task = name, error = %e, "Sweep failed"),
                }
            }
            debug!(task = name, "Maintenance task stopped");
        });

        Self {
            name,
            token,
            handle,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Requests the task to stop. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels and waits for the loop to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Maintenance task ended abnormally");
        }
    }
}

/// The set of maintenance tasks owned by the process.
///
/// Each task gets a child of the set's root token, so tasks can be cancelled
/// individually or all at once.
#[derive(Debug, Default)]
pub struct MaintenanceTasks {
    root: CancellationToken,
    tasks: Vec<PeriodicTask>,
}

impl MaintenanceTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts sweeping `target` every `every`.
    pub fn spawn(&mut self, target: Arc<dyn Sweep>, every: Duration) -> &PeriodicTask {
        let task = PeriodicTask::spawn(target, every, self.root.child_token());
        info!(task = task.name(), interval = ?every, "Maintenance task started");
        self.tasks.push(task);
        &self.tasks[self.tasks.len() - 1]
    }

    /// Root token; cancelling it stops every task.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancels a single task by name. Returns `true` if one was found.
    pub fn cancel_task(&self, name: &str) -> bool {
        let mut found = false;
        for task in self.tasks.iter().filter(|t| t.name() == name) {
            task.cancel();
            found = true;
        }
        found
    }

    /// Cancels every task without waiting. Idempotent.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancels every task and waits for all loops to exit.
    pub async fn shutdown(self) {
        self.root.cancel();
        for task in self.tasks {
            task.stop().await;
        }
        info!("Maintenance tasks stopped");
    }
}
