//! Human-readable rendering of snapshots, network info and speed tests.

use std::fmt::Write as _;

use netpulse_types::{LatencySample, NetworkInfo, RateSample, SpeedTestResult, TelemetrySnapshot};

/// Placeholder for a latency that has not been measured yet.
pub const NOT_MEASURED: &str = "--";

/// `12.34 KB/s`
pub fn format_rate(kbps: f64) -> String {
    format!("{:.2} KB/s", kbps)
}

/// `18.2 ms`, `timeout`, or `--` before the first probe.
pub fn format_latency(latency: Option<LatencySample>) -> String {
    match latency {
        None => NOT_MEASURED.to_string(),
        Some(LatencySample {
            round_trip_ms: Some(ms),
        }) => format!("{:.1} ms", ms),
        Some(_) => "timeout".to_string(),
    }
}

/// Format a throughput in Mbps, switching to Gbps above 1000.
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 100.0 {
        format!("{:.0} Mbps", mbps)
    } else if mbps >= 10.0 {
        format!("{:.1} Mbps", mbps)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}

/// One status line per snapshot.
pub fn snapshot_line(snapshot: &TelemetrySnapshot) -> String {
    let RateSample {
        download_kbps,
        upload_kbps,
    } = snapshot.rate;

    format!(
        "#{:<5} down {:>12}  up {:>12}  ping {:>8}  local {}  public {}",
        snapshot.sequence,
        format_rate(download_kbps),
        format_rate(upload_kbps),
        format_latency(snapshot.latency),
        snapshot.network.local_ip_or_unknown(),
        snapshot.network.public_ip_or_unknown(),
    )
}

pub fn network_block(info: &NetworkInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Local IP:    {}", info.local_ip_or_unknown());
    let _ = writeln!(out, "Public IP:   {}", info.public_ip_or_unknown());
    let _ = writeln!(out, "Gateway:     {}", info.gateway_or_unknown());
    let _ = writeln!(out, "DNS servers: {}", info.dns_display());
    out
}

pub fn speed_test_block(result: &SpeedTestResult) -> String {
    match result {
        SpeedTestResult::Completed(report) => {
            let mut out = String::new();
            let _ = writeln!(out, "Server:   {}", report.server);
            let _ = writeln!(out, "Ping:     {:.1} ms", report.ping_ms);
            let _ = writeln!(out, "Download: {}", format_speed(report.download_mbps));
            let _ = writeln!(out, "Upload:   {}", format_speed(report.upload_mbps));
            let _ = writeln!(
                out,
                "IP:       {}",
                report.local_ip.as_deref().unwrap_or(netpulse_types::UNKNOWN)
            );
            let _ = writeln!(
                out,
                "DNS:      {}",
                report.dns_server.as_deref().unwrap_or(netpulse_types::NOT_AVAILABLE)
            );
            out
        }
        SpeedTestResult::Failed { error } => format!("Speed test failed: {}\n", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpulse_types::SpeedTestReport;

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0.00 KB/s");
        assert_eq!(format_rate(1.0), "1.00 KB/s");
        assert_eq!(format_rate(1234.567), "1234.57 KB/s");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(None), "--");
        assert_eq!(format_latency(Some(LatencySample::timeout())), "timeout");
        assert_eq!(format_latency(Some(LatencySample::measured(18.24))), "18.2 ms");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1500.0), "1.5 Gbps");
        assert_eq!(format_speed(250.4), "250 Mbps");
        assert_eq!(format_speed(42.37), "42.4 Mbps");
        assert_eq!(format_speed(3.456), "3.46 Mbps");
    }

    #[test]
    fn test_snapshot_line_before_resolution() {
        let snapshot = TelemetrySnapshot::builder().sequence(3).build();
        let line = snapshot_line(&snapshot);

        assert!(line.starts_with("#3 "));
        assert!(line.contains("0.00 KB/s"));
        assert!(line.contains("ping       --"));
        assert!(line.contains("local Unknown"));
        assert!(line.contains("public Unknown"));
    }

    #[test]
    fn test_network_block() {
        let info = NetworkInfo {
            local_ip: Some("192.168.1.20".into()),
            gateway: Some("192.168.1.1".into()),
            ..Default::default()
        };
        let block = network_block(&info);

        assert!(block.contains("Local IP:    192.168.1.20"));
        assert!(block.contains("Public IP:   Unknown"));
        assert!(block.contains("Gateway:     192.168.1.1"));
        assert!(block.contains("DNS servers: N/A"));
    }

    #[test]
    fn test_speed_test_block() {
        let result = SpeedTestResult::Completed(SpeedTestReport {
            server: "speed.cloudflare.com".into(),
            ping_ms: 12.34,
            download_mbps: 94.2,
            upload_mbps: 1200.0,
            local_ip: Some("10.0.0.2".into()),
            dns_server: None,
        });
        let block = speed_test_block(&result);

        assert!(block.contains("Ping:     12.3 ms"));
        assert!(block.contains("Download: 94.2 Mbps"));
        assert!(block.contains("Upload:   1.2 Gbps"));
        assert!(block.contains("DNS:      N/A"));

        let failed = speed_test_block(&SpeedTestResult::failed("download: connection reset"));
        assert_eq!(failed, "Speed test failed: download: connection reset\n");
    }
}
