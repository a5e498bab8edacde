//! Error types for probes.

use thiserror::Error;

/// Errors that can occur while taking a measurement.
///
/// Probes report these to their callers; the scheduler degrades them into
/// absent values rather than propagating them.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The operation did not finish within its deadline.
    #[error("Timed out")]
    Timeout,

    /// A lookup failed or produced nothing usable.
    #[error("Unresolvable: {0}")]
    Unresolvable(String),

    /// A benchmark step aborted mid-run.
    #[error("Measurement failed: {0}")]
    MeasurementFailure(String),

    /// Non-positive elapsed time or a counter that went backwards.
    #[error("Clock anomaly: {0}")]
    ClockAnomaly(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse a response or command output.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// A platform command could not be run or exited unsuccessfully.
    #[error("Command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else if err.is_connect() {
            ProbeError::Unresolvable(err.to_string())
        } else {
            ProbeError::Http(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProbeError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(ProbeError::Timeout.to_string(), "Timed out");
        assert_eq!(
            ProbeError::Unresolvable("no default route".into()).to_string(),
            "Unresolvable: no default route"
        );
        assert_eq!(
            ProbeError::MeasurementFailure("upload".into()).to_string(),
            "Measurement failed: upload"
        );
    }

    #[tokio::test]
    async fn elapsed_maps_to_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(ProbeError::from(elapsed), ProbeError::Timeout));
    }
}
