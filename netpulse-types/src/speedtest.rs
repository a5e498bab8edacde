//! One-shot speed test outcomes.

use alloc::string::String;

/// Measurements from a completed speed test run.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct SpeedTestReport {
    /// Name of the benchmark server that was selected.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub server: String,

    /// Baseline round trip to the selected server.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub ping_ms: f64,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub download_mbps: f64,

    #[cfg_attr(feature = "minicbor", n(3))]
    pub upload_mbps: f64,

    /// Local address at the time of the run, if it could be determined.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    #[cfg_attr(feature = "minicbor", n(4))]
    pub local_ip: Option<String>,

    /// First configured DNS resolver at the time of the run.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    #[cfg_attr(feature = "minicbor", n(5))]
    pub dns_server: Option<String>,
}

/// Result of a speed test: all measurements, or a single error.
///
/// A run that fails part way never carries partial figures.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub enum SpeedTestResult {
    #[cfg_attr(feature = "minicbor", n(0))]
    Completed(#[cfg_attr(feature = "minicbor", n(0))] SpeedTestReport),

    #[cfg_attr(feature = "minicbor", n(1))]
    Failed {
        #[cfg_attr(feature = "minicbor", n(0))]
        error: String,
    },
}

impl SpeedTestResult {
    pub fn failed(error: impl Into<String>) -> Self {
        SpeedTestResult::Failed {
            error: error.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SpeedTestResult::Completed(_))
    }

    pub fn report(&self) -> Option<&SpeedTestReport> {
        match self {
            SpeedTestResult::Completed(report) => Some(report),
            SpeedTestResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SpeedTestResult::Completed(_) => None,
            SpeedTestResult::Failed { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_has_no_report() {
        let result = SpeedTestResult::failed("download: connection reset");
        assert!(!result.is_completed());
        assert!(result.report().is_none());
        assert_eq!(result.error(), Some("download: connection reset"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_shapes_match_wire_format() {
        let failed = SpeedTestResult::failed("no servers");
        let json = serde_json::to_string(&failed).unwrap();
        assert_eq!(json, r#"{"error":"no servers"}"#);

        let parsed: SpeedTestResult =
            serde_json::from_str(r#"{"server":"edge","ping_ms":9.5,"download_mbps":120.0,"upload_mbps":20.0}"#)
                .unwrap();
        let report = parsed.report().unwrap();
        assert_eq!(report.server, "edge");
        assert_eq!(report.local_ip, None);

        let parsed: SpeedTestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failed);
    }
}
