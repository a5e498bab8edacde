//! Handle for a running scheduler.

use std::sync::Arc;
use std::time::Duration;

use netpulse_types::{NetworkInfo, TelemetrySnapshot};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::scheduler::Shared;
use crate::task::AbortOnDrop;

/// Controls a started [`Scheduler`](crate::Scheduler).
///
/// Drop this handle to stop the scheduler, or call [`stop`](Self::stop)
/// or [`shutdown`](Self::shutdown) explicitly. Once either has been called
/// no output receives another snapshot.
///
/// # Example
///
/// ```rust,no_run
/// use netpulse_sdk::Scheduler;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = Scheduler::new().start();
///
///     tokio::signal::ctrl_c().await.ok();
///     handle.shutdown().await;
/// }
/// ```
#[must_use = "dropping the handle stops the scheduler"]
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
    tasks: Vec<AbortOnDrop<()>>,
    grace: Duration,
}

impl SchedulerHandle {
    pub(crate) fn new(
        stop_tx: watch::Sender<bool>,
        shared: Arc<Shared>,
        tasks: Vec<AbortOnDrop<()>>,
        grace: Duration,
    ) -> Self {
        Self {
            stop_tx,
            shared,
            tasks,
            grace,
        }
    }

    /// Stop publishing and signal both loops to exit.
    ///
    /// Returns without waiting. No snapshot is published after this call.
    pub fn stop(&self) {
        if self.shared.state.is_closed() {
            return;
        }
        self.shared.state.close();
        self.stop_tx.send_replace(true);
        tracing::info!(sequence = self.shared.state.sequence(), "scheduler stopped");
    }

    /// Stop and wait for the loops to exit.
    ///
    /// In-flight ticks get the shutdown grace period to finish; anything
    /// still running after that is aborted.
    pub async fn shutdown(mut self) {
        self.stop();

        let deadline = Instant::now() + self.grace;
        for task in self.tasks.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !task.settle(remaining).await {
                tracing::warn!("cadence loop did not exit within grace period, aborting");
            }
        }
        // remaining tasks are aborted when `self` drops
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.shared.state.latest()
    }

    /// Run one resolving pass outside the cadence and publish it.
    pub async fn resolve_now(&self) -> NetworkInfo {
        self.shared.resolve_tick().await
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.is_closed()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("stopped", &self.is_stopped())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
