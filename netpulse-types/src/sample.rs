//! Throughput and latency samples.

/// Bytes per kilobyte used when normalising rates.
pub const BYTES_PER_KB: f64 = 1024.0;

/// A cumulative reading of the host's byte counters.
///
/// Samples are recorded once and never edited. Two consecutive samples are
/// combined to derive a [`RateSample`]; the earlier one is called the
/// baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct ByteCounterSample {
    /// Seconds on a monotonic clock. Only differences are meaningful.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub timestamp_monotonic: f64,

    /// Total bytes sent across all interfaces.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub bytes_sent: u64,

    /// Total bytes received across all interfaces.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub bytes_received: u64,
}

impl ByteCounterSample {
    pub const fn new(timestamp_monotonic: f64, bytes_sent: u64, bytes_received: u64) -> Self {
        Self {
            timestamp_monotonic,
            bytes_sent,
            bytes_received,
        }
    }

    /// Seconds elapsed since `earlier`. May be zero or negative on clock anomalies.
    pub fn elapsed_since(&self, earlier: &ByteCounterSample) -> f64 {
        self.timestamp_monotonic - earlier.timestamp_monotonic
    }

    /// True if either counter went backwards relative to `earlier`
    /// (interface reset, counter wraparound, interface removed).
    pub fn is_reset_from(&self, earlier: &ByteCounterSample) -> bool {
        self.bytes_sent < earlier.bytes_sent || self.bytes_received < earlier.bytes_received
    }
}

/// Instantaneous throughput derived from two counter samples.
///
/// Never persisted; recomputed every fast-loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct RateSample {
    /// Receive rate in KB/s (1 KB = 1024 bytes).
    #[cfg_attr(feature = "minicbor", n(0))]
    pub download_kbps: f64,

    /// Transmit rate in KB/s (1 KB = 1024 bytes).
    #[cfg_attr(feature = "minicbor", n(1))]
    pub upload_kbps: f64,
}

impl RateSample {
    /// The rate reported before a baseline exists and after a counter reset.
    pub const ZERO: RateSample = RateSample {
        download_kbps: 0.0,
        upload_kbps: 0.0,
    };

    pub const fn new(download_kbps: f64, upload_kbps: f64) -> Self {
        Self {
            download_kbps,
            upload_kbps,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.download_kbps == 0.0 && self.upload_kbps == 0.0
    }
}

/// Outcome of a single echo probe.
///
/// `round_trip_ms == None` means the probe timed out or the target was
/// unreachable. A snapshot that has not probed yet carries no
/// `LatencySample` at all, which keeps "timeout" distinct from
/// "not yet measured".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct LatencySample {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub round_trip_ms: Option<f64>,
}

impl LatencySample {
    /// A probe that received a reply after `round_trip_ms` milliseconds.
    ///
    /// Negative inputs are clamped to zero.
    pub fn measured(round_trip_ms: f64) -> Self {
        Self {
            round_trip_ms: Some(round_trip_ms.max(0.0)),
        }
    }

    /// A probe that got no reply within its timeout.
    pub const fn timeout() -> Self {
        Self { round_trip_ms: None }
    }

    pub fn is_timeout(&self) -> bool {
        self.round_trip_ms.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_and_reset_detection() {
        let a = ByteCounterSample::new(10.0, 1000, 2000);
        let b = ByteCounterSample::new(11.5, 1500, 1999);

        assert_eq!(b.elapsed_since(&a), 1.5);
        assert!(b.is_reset_from(&a));
        assert!(!a.is_reset_from(&ByteCounterSample::new(9.0, 1000, 2000)));
    }

    #[test]
    fn zero_rate() {
        assert!(RateSample::ZERO.is_zero());
        assert!(RateSample::default().is_zero());
        assert!(!RateSample::new(0.0, 0.1).is_zero());
    }

    #[test]
    fn latency_constructors() {
        assert!(LatencySample::timeout().is_timeout());
        assert_eq!(LatencySample::measured(12.5).round_trip_ms, Some(12.5));
        assert_eq!(LatencySample::measured(-3.0).round_trip_ms, Some(0.0));
    }
}
