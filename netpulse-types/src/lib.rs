//! # netpulse-types
//!
//! Core types for network telemetry. This crate defines the values that the
//! netpulse sampler produces and that any consumer (a UI, a log sink, a
//! metrics exporter) receives.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable `serde` and/or `minicbor` features as needed
//! - **Immutable samples**: Counter readings are recorded once and never edited
//! - **Versioned snapshots**: Every published snapshot carries a schema version
//!   and a monotonically increasing sequence number
//!
//! ## Features
//!
//! - `std` (default): Standard library support
//! - `serde`: JSON/MessagePack/etc. serialization via serde
//! - `minicbor`: Compact binary serialization via CBOR
//! - `all`: Enable all serialization formats
//!
//! ## Example
//!
//! ```rust
//! use netpulse_types::{LatencySample, NetworkInfo, RateSample, TelemetrySnapshot};
//!
//! let snapshot = TelemetrySnapshot::builder()
//!     .sequence(7)
//!     .rate(RateSample::new(12.5, 3.0))
//!     .latency(LatencySample::measured(18.2))
//!     .network(NetworkInfo {
//!         local_ip: Some("192.168.1.20".into()),
//!         ..Default::default()
//!     })
//!     .build();
//!
//! assert_eq!(snapshot.sequence, 7);
//! assert_eq!(snapshot.network.public_ip_or_unknown(), "Unknown");
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**. The version is included in serialized
//! snapshots to allow consumers to handle format evolution gracefully.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod info;
mod sample;
mod snapshot;
mod speedtest;
mod version;

pub use info::*;
pub use sample::*;
pub use snapshot::*;
pub use speedtest::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the snapshot format.
/// Consumers should check this version and handle older formats appropriately.
pub const SCHEMA_VERSION: u32 = 1;
