//! # netpulse
//!
//! Headless network telemetry for the command line.
//!
//! The `netpulse` binary wires the sampler from `netpulse-sdk` to stdout:
//!
//! ```bash
//! # Live bandwidth, latency and addressing, one line per second
//! netpulse watch
//!
//! # The same as JSON lines, also mirrored to a file
//! netpulse watch --json --file netpulse.json
//!
//! # Network info, once
//! netpulse info
//!
//! # A single speed test
//! netpulse speedtest
//! ```
//!
//! The library half holds the pieces the binary is built from:
//!
//! - [`settings`]: layered configuration (defaults, TOML, environment, flags)
//! - [`duration`]: `"1s"` / `"500ms"` parsing for settings
//! - [`render`]: text formatting for rates, latency and speeds
//! - [`sink`]: the stdout printer fed by the scheduler

pub mod duration;
pub mod render;
pub mod settings;
pub mod sink;

pub use settings::{Overrides, Settings};
pub use sink::SnapshotFormat;
