//! # netpulse-probes
//!
//! Measurement providers for netpulse.
//!
//! Each provider answers one question about the host's network and can be
//! swapped for a fake in tests:
//!
//! - [`counter`]: cumulative byte counters and the rates derived from them
//! - [`latency`]: a single echo round trip, or a timeout
//! - [`resolver`]: local IP, public IP, default gateway and DNS servers
//! - [`speedtest`]: an on-demand download/upload benchmark
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netpulse_probes::{CounterSampler, LatencyProbe, NetworkInfoResolver, PingProbe};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut sampler = CounterSampler::system();
//!     let (_, baseline) = sampler.sample(None);
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     let (rate, _) = sampler.sample(Some(&baseline));
//!     println!("down {:.2} KB/s", rate.download_kbps);
//!
//!     let latency = PingProbe::new().probe("8.8.8.8", Duration::from_secs(1)).await;
//!     println!("rtt {:?}", latency.round_trip_ms);
//!
//!     let info = NetworkInfoResolver::new().resolve().await;
//!     println!("public ip {}", info.public_ip_or_unknown());
//! }
//! ```

pub mod counter;
pub mod error;
pub mod latency;
pub mod resolver;
pub mod speedtest;

pub use counter::{derive_rate, CounterSampler, CounterSource, SysinfoCounters};
pub use error::ProbeError;
pub use latency::{LatencyProbe, PingProbe, TcpConnectProbe};
pub use resolver::{
    HttpPublicIp, LocalIpLookup, NetworkInfoResolver, NetworkInfoResolverBuilder, PosixRouting,
    PublicIpLookup, RouteLocalIp, RoutingInfoProvider, WindowsRouting,
};
pub use speedtest::{
    BenchmarkServer, HttpSpeedTest, HttpSpeedTestBuilder, SpeedTestPhase, SpeedTestProvider,
    SpeedTestRunner,
};

// Re-export types for convenience
pub use netpulse_types::{
    ByteCounterSample, LatencySample, NetworkInfo, RateSample, SpeedTestReport, SpeedTestResult,
};
