//! Owned background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned task that is aborted when its owner goes away.
///
/// Dropping the guard aborts the task at its next await point, which drops
/// whatever it holds (child processes spawned with `kill_on_drop`, sockets).
#[derive(Debug)]
pub(crate) struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    /// Wait up to `grace` for the task to finish by itself.
    ///
    /// Returns `false` if the grace period ran out. Call at most once.
    pub async fn settle(&mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, &mut self.0).await.is_ok()
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
