//! On-demand speed tests, one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use netpulse_probes::{NetworkInfoResolver, SpeedTestPhase, SpeedTestProvider, SpeedTestRunner};
use netpulse_types::SpeedTestResult;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A speed test was requested while another one was still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a speed test is already running")]
pub struct SpeedTestBusy;

/// Starts speed tests in the background and admits only one at a time.
///
/// # Example
///
/// ```rust,no_run
/// use netpulse_probes::HttpSpeedTest;
/// use netpulse_sdk::SpeedTestController;
///
/// #[tokio::main]
/// async fn main() {
///     let controller = SpeedTestController::new(HttpSpeedTest::builder().build());
///
///     let task = controller.start().expect("idle");
///     assert!(controller.start().is_err());
///
///     match task.result().await.report() {
///         Some(report) => println!("{:.1} Mbps down", report.download_mbps),
///         None => println!("speed test failed"),
///     }
/// }
/// ```
#[derive(Clone)]
pub struct SpeedTestController {
    provider: Arc<dyn SpeedTestProvider>,
    context: Option<NetworkInfoResolver>,
    busy: Arc<AtomicBool>,
}

impl SpeedTestController {
    pub fn new(provider: impl SpeedTestProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            context: None,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach local IP and DNS server from `resolver` to completed reports.
    pub fn with_context(mut self, resolver: NetworkInfoResolver) -> Self {
        self.context = Some(resolver);
        self
    }

    /// Start a speed test in the background.
    ///
    /// Fails with [`SpeedTestBusy`] while a previous test is still running.
    pub fn start(&self) -> Result<SpeedTestTask, SpeedTestBusy> {
        self.spawn(None)
    }

    /// Like [`start`](Self::start), reporting phase changes on `progress`.
    pub fn start_with_progress(
        &self,
        progress: UnboundedSender<SpeedTestPhase>,
    ) -> Result<SpeedTestTask, SpeedTestBusy> {
        self.spawn(Some(progress))
    }

    /// True while a started test has not finished or been cancelled.
    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn spawn(&self, progress: Option<UnboundedSender<SpeedTestPhase>>) -> Result<SpeedTestTask, SpeedTestBusy> {
        let guard = BusyGuard::acquire(&self.busy).ok_or(SpeedTestBusy)?;

        let mut runner = SpeedTestRunner::new(self.provider.clone());
        if let Some(resolver) = &self.context {
            runner = runner.with_context(resolver.clone());
        }
        if let Some(tx) = progress {
            runner = runner.with_progress(tx);
        }

        tracing::info!("speed test started");
        let handle = tokio::spawn(async move {
            let _guard = guard;
            runner.run().await
        });

        Ok(SpeedTestTask { handle })
    }
}

impl std::fmt::Debug for SpeedTestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedTestController")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Holds the one-at-a-time gate; released when dropped.
///
/// Lives inside the spawned task, so the gate opens on completion, on
/// cancellation and on panic alike.
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy: busy.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// A running speed test.
///
/// Dropping the task lets the test run to completion in the background;
/// call [`cancel`](Self::cancel) to abandon it.
#[derive(Debug)]
pub struct SpeedTestTask {
    handle: JoinHandle<SpeedTestResult>,
}

impl SpeedTestTask {
    /// Abandon the test. In-flight requests are dropped.
    pub fn cancel(&self) {
        tracing::info!("speed test cancelled");
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the outcome.
    ///
    /// A cancelled or panicked test yields [`SpeedTestResult::Failed`].
    pub async fn result(self) -> SpeedTestResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => SpeedTestResult::failed("speed test cancelled"),
            Err(e) => SpeedTestResult::failed(format!("speed test aborted: {e}")),
        }
    }
}
