//! # netpulse-sdk
//!
//! Telemetry scheduler for netpulse.
//!
//! This crate runs the probes from `netpulse-probes` on two cadences and
//! publishes every result as an immutable, versioned [`TelemetrySnapshot`]
//! to the outputs you configure.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netpulse_sdk::{Output, Scheduler, TelemetrySnapshot};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = Scheduler::builder()
//!         .output(Output::file("netpulse.json"))
//!         .output(Output::subscriber(|snapshot: TelemetrySnapshot| {
//!             println!("#{} {:.2} KB/s down", snapshot.sequence, snapshot.rate.download_kbps);
//!         }))
//!         .fast_interval(Duration::from_secs(1))
//!         .slow_interval(Duration::from_secs(60))
//!         .build()
//!         .start();
//!
//!     // ... your application runs ...
//!
//!     handle.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Two cadences**: counters and latency every second, network info every minute
//! - **No overlap**: a tick that is still running causes the next one to be skipped
//! - **Multiple outputs**: subscriber callback, channel, watch, file, TCP, Prometheus
//! - **Bounded shutdown**: in-flight probes get a grace period, then are aborted
//! - **Speed tests**: one background run at a time, cancellable

mod handle;
mod output;
mod scheduler;
mod speedtest;
mod state;
mod task;

#[cfg(feature = "prometheus")]
pub mod prometheus;

pub use handle::SchedulerHandle;
pub use output::{Output, Subscriber};
pub use scheduler::{
    Scheduler, SchedulerBuilder, DEFAULT_FAST_INTERVAL, DEFAULT_LATENCY_TARGET,
    DEFAULT_LATENCY_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, DEFAULT_SLOW_INTERVAL,
};
pub use speedtest::{SpeedTestBusy, SpeedTestController, SpeedTestTask};

#[cfg(feature = "prometheus")]
pub use prometheus::{PrometheusConfig, PrometheusExporter};

// Re-export types for convenience
pub use netpulse_probes::{NetworkInfoResolver, SpeedTestPhase};
pub use netpulse_types::{
    LatencySample, NetworkInfo, RateSample, SpeedTestReport, SpeedTestResult, TelemetrySnapshot,
};
