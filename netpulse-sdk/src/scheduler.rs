//! The telemetry scheduler: two cadence loops feeding one snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use netpulse_probes::{
    CounterSampler, CounterSource, LatencyProbe, NetworkInfoResolver, PingProbe, SysinfoCounters,
};
use netpulse_types::{ByteCounterSample, NetworkInfo, RateSample, TelemetrySnapshot};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::handle::SchedulerHandle;
use crate::output::Output;
use crate::state::TelemetryState;
use crate::task::AbortOnDrop;

pub const DEFAULT_FAST_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SLOW_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LATENCY_TARGET: &str = "8.8.8.8";
pub const DEFAULT_LATENCY_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Counter sampler plus the baseline carried between fast ticks.
struct CounterCycle {
    sampler: CounterSampler<Box<dyn CounterSource>>,
    baseline: Option<ByteCounterSample>,
}

/// Everything the cadence loops share.
pub(crate) struct Shared {
    pub(crate) state: TelemetryState,
    counters: Mutex<CounterCycle>,
    latency: Arc<dyn LatencyProbe>,
    latency_target: String,
    latency_timeout: Duration,
    resolver: NetworkInfoResolver,
}

impl Shared {
    /// Read the counters and advance the baseline.
    fn sample_rate(&self) -> RateSample {
        let mut cycle = self.counters.lock();
        let CounterCycle { sampler, baseline } = &mut *cycle;
        let (rate, next) = sampler.sample(baseline.as_ref());
        *baseline = Some(next);
        rate
    }

    /// One fast-loop tick: counters and latency, then a single publish.
    async fn sample_tick(&self) {
        let rate = self.sample_rate();
        let latency = self
            .latency
            .probe(&self.latency_target, self.latency_timeout)
            .await;

        if let Some(sequence) = self.state.publish_sample(rate, latency) {
            tracing::debug!(
                sequence,
                download_kbps = rate.download_kbps,
                upload_kbps = rate.upload_kbps,
                latency_ms = ?latency.round_trip_ms,
                "sampled"
            );
        }
    }

    /// One slow-loop tick: resolve network info and publish it.
    pub(crate) async fn resolve_tick(&self) -> NetworkInfo {
        let network = self.resolver.resolve().await;
        if let Some(sequence) = self.state.publish_network(network.clone()) {
            tracing::debug!(sequence, "network info refreshed");
        }
        network
    }
}

/// Runs the fast and slow cadence loops and publishes snapshots.
///
/// The fast loop samples byte counters and probes latency every
/// `fast_interval` (1s by default), starting one period after
/// [`start`](Scheduler::start). The slow loop resolves network info right
/// away and then every `slow_interval` (60s by default). Every tick of
/// either loop produces one snapshot with the next sequence number.
///
/// # Example
///
/// ```rust,no_run
/// use netpulse_sdk::{Output, Scheduler};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let (output, mut rx) = Output::channel(16);
///
///     let handle = Scheduler::builder()
///         .output(output)
///         .fast_interval(Duration::from_secs(1))
///         .build()
///         .start();
///
///     while let Some(snapshot) = rx.recv().await {
///         println!("#{} down {:.2} KB/s", snapshot.sequence, snapshot.rate.download_kbps);
///     }
///
///     handle.shutdown().await;
/// }
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
    outputs: Vec<Output>,
    fast_interval: Duration,
    slow_interval: Duration,
    grace: Duration,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("outputs", &self.outputs)
            .field("fast_interval", &self.fast_interval)
            .field("slow_interval", &self.slow_interval)
            .field("latency_target", &self.shared.latency_target)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// A scheduler with default providers and no outputs.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.shared.state.latest()
    }

    /// Run one resolving pass outside the cadence and publish it.
    pub async fn resolve_now(&self) -> NetworkInfo {
        self.shared.resolve_tick().await
    }

    /// Activate the outputs and spawn both cadence loops.
    ///
    /// Must be called inside a tokio runtime. Dropping the returned handle
    /// stops the scheduler.
    pub fn start(self) -> SchedulerHandle {
        let sinks = self.outputs.iter().map(Output::activate).collect();
        self.shared.state.attach(sinks);

        // Baseline for the first fast tick.
        self.shared.sample_rate();

        let (stop_tx, stop_rx) = watch::channel(false);

        let mut fast = tokio::time::interval_at(Instant::now() + self.fast_interval, self.fast_interval);
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slow = tokio::time::interval(self.slow_interval);
        slow.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sampling = {
            let shared = self.shared.clone();
            run_cadence("sampling", fast, stop_rx.clone(), self.grace, move || {
                let shared = shared.clone();
                async move { shared.sample_tick().await }
            })
        };
        let resolving = {
            let shared = self.shared.clone();
            run_cadence("resolving", slow, stop_rx, self.grace, move || {
                let shared = shared.clone();
                async move {
                    shared.resolve_tick().await;
                }
            })
        };

        tracing::info!(
            fast_interval_ms = self.fast_interval.as_millis() as u64,
            slow_interval_ms = self.slow_interval.as_millis() as u64,
            outputs = self.outputs.len(),
            "scheduler started"
        );

        SchedulerHandle::new(
            stop_tx,
            self.shared,
            vec![
                AbortOnDrop::new(tokio::spawn(sampling)),
                AbortOnDrop::new(tokio::spawn(resolving)),
            ],
            self.grace,
        )
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one cadence group until stopped.
///
/// Each tick runs as its own task. A tick that comes due while the previous
/// one is still running is skipped. On stop, the in-flight tick gets up to
/// `grace` to finish and is then aborted.
async fn run_cadence<F, Fut>(
    cadence: &'static str,
    mut ticker: Interval,
    mut stop_rx: watch::Receiver<bool>,
    grace: Duration,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut in_flight: Option<AbortOnDrop<()>> = None;

    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
                    tracing::debug!(cadence, "previous tick still running, skipping");
                    continue;
                }
                in_flight = Some(AbortOnDrop::new(tokio::spawn(tick())));
            }
        }
    }

    if let Some(mut task) = in_flight {
        if !task.is_finished() && !task.settle(grace).await {
            tracing::warn!(cadence, grace_ms = grace.as_millis() as u64, "abandoning in-flight tick");
        }
    }
    tracing::debug!(cadence, "cadence loop stopped");
}

/// Builder for configuring a [`Scheduler`].
pub struct SchedulerBuilder {
    outputs: Vec<Output>,
    fast_interval: Duration,
    slow_interval: Duration,
    grace: Duration,
    counters: Option<Box<dyn CounterSource>>,
    latency: Option<Arc<dyn LatencyProbe>>,
    latency_target: String,
    latency_timeout: Duration,
    resolver: Option<NetworkInfoResolver>,
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("outputs", &self.outputs)
            .field("fast_interval", &self.fast_interval)
            .field("slow_interval", &self.slow_interval)
            .field("latency_target", &self.latency_target)
            .finish_non_exhaustive()
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            outputs: Vec::new(),
            fast_interval: DEFAULT_FAST_INTERVAL,
            slow_interval: DEFAULT_SLOW_INTERVAL,
            grace: DEFAULT_SHUTDOWN_GRACE,
            counters: None,
            latency: None,
            latency_target: DEFAULT_LATENCY_TARGET.to_string(),
            latency_timeout: DEFAULT_LATENCY_TIMEOUT,
            resolver: None,
        }
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; snapshots will be emitted to all of them.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Period of the sampling loop (counters and latency).
    pub fn fast_interval(mut self, interval: Duration) -> Self {
        self.fast_interval = interval;
        self
    }

    /// Period of the resolving loop (network info).
    pub fn slow_interval(mut self, interval: Duration) -> Self {
        self.slow_interval = interval;
        self
    }

    /// How long shutdown waits for in-flight ticks before aborting them.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn counter_source(mut self, source: impl CounterSource + 'static) -> Self {
        self.counters = Some(Box::new(source));
        self
    }

    pub fn latency_probe(mut self, probe: impl LatencyProbe + 'static) -> Self {
        self.latency = Some(Arc::new(probe));
        self
    }

    /// Host probed on every fast tick.
    pub fn latency_target(mut self, target: impl Into<String>) -> Self {
        self.latency_target = target.into();
        self
    }

    pub fn latency_timeout(mut self, timeout: Duration) -> Self {
        self.latency_timeout = timeout;
        self
    }

    pub fn resolver(mut self, resolver: NetworkInfoResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the scheduler.
    ///
    /// Zero intervals are raised to one millisecond, since a tokio interval
    /// cannot have a zero period.
    pub fn build(self) -> Scheduler {
        let counters = self
            .counters
            .unwrap_or_else(|| Box::new(SysinfoCounters::new()));

        let shared = Shared {
            state: TelemetryState::default(),
            counters: Mutex::new(CounterCycle {
                sampler: CounterSampler::new(counters),
                baseline: None,
            }),
            latency: self.latency.unwrap_or_else(|| Arc::new(PingProbe::new())),
            latency_target: self.latency_target,
            latency_timeout: self.latency_timeout,
            resolver: self.resolver.unwrap_or_default(),
        };

        Scheduler {
            shared: Arc::new(shared),
            outputs: self.outputs,
            fast_interval: self.fast_interval.max(Duration::from_millis(1)),
            slow_interval: self.slow_interval.max(Duration::from_millis(1)),
            grace: self.grace,
        }
    }
}
