//! TelemetrySnapshot - the unit published to subscribers.

use crate::{LatencySample, NetworkInfo, RateSample, SchemaVersion};

/// The latest aggregated telemetry state.
///
/// Every publish produces a new snapshot with a higher `sequence`.
/// Subscribers receive their own copy and can never reach back into the
/// sampler's state.
///
/// # Example
///
/// ```rust
/// use netpulse_types::{LatencySample, RateSample, TelemetrySnapshot};
///
/// let snapshot = TelemetrySnapshot::builder()
///     .sequence(1)
///     .rate(RateSample::new(1.0, 1.0))
///     .latency(LatencySample::timeout())
///     .build();
///
/// assert!(snapshot.latency.unwrap().is_timeout());
///
/// // Serialize with serde (requires "serde" feature)
/// // let json = serde_json::to_string(&snapshot)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct TelemetrySnapshot {
    /// Schema version for forward compatibility.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub version: SchemaVersion,

    /// Publish counter; strictly increasing within one scheduler.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub sequence: u64,

    /// Unix timestamp in milliseconds when this snapshot was assembled.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub timestamp_ms: u64,

    #[cfg_attr(feature = "minicbor", n(3))]
    pub rate: RateSample,

    /// `None` until the first probe has completed.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub latency: Option<LatencySample>,

    #[cfg_attr(feature = "minicbor", n(5))]
    pub network: NetworkInfo,
}

impl TelemetrySnapshot {
    /// An empty snapshot (sequence 0) with the current timestamp.
    #[cfg(feature = "std")]
    pub fn new() -> Self {
        Self::with_timestamp(current_timestamp_ms())
    }

    /// An empty snapshot (sequence 0) with a specific timestamp.
    pub fn with_timestamp(timestamp_ms: u64) -> Self {
        Self {
            version: SchemaVersion::current(),
            sequence: 0,
            timestamp_ms,
            rate: RateSample::ZERO,
            latency: None,
            network: NetworkInfo::unknown(),
        }
    }

    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    /// True once at least one echo probe has completed.
    pub fn has_latency(&self) -> bool {
        self.latency.is_some()
    }
}

#[cfg(feature = "std")]
impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing `TelemetrySnapshot` instances.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    sequence: u64,
    timestamp_ms: Option<u64>,
    rate: RateSample,
    latency: Option<LatencySample>,
    network: NetworkInfo,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    pub fn rate(mut self, rate: RateSample) -> Self {
        self.rate = rate;
        self
    }

    pub fn latency(mut self, latency: LatencySample) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn maybe_latency(mut self, latency: Option<LatencySample>) -> Self {
        self.latency = latency;
        self
    }

    pub fn network(mut self, network: NetworkInfo) -> Self {
        self.network = network;
        self
    }

    #[cfg(feature = "std")]
    pub fn build(self) -> TelemetrySnapshot {
        let timestamp_ms = self.timestamp_ms.unwrap_or_else(current_timestamp_ms);
        self.finish(timestamp_ms)
    }

    /// Build the snapshot with a specific timestamp (for no_std).
    #[cfg(not(feature = "std"))]
    pub fn build(self) -> TelemetrySnapshot {
        let timestamp_ms = self.timestamp_ms.unwrap_or(0);
        self.finish(timestamp_ms)
    }

    fn finish(self, timestamp_ms: u64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            version: SchemaVersion::current(),
            sequence: self.sequence,
            timestamp_ms,
            rate: self.rate,
            latency: self.latency,
            network: self.network,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
#[cfg(feature = "std")]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
