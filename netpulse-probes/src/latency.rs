//! Latency prober: one echo measurement per call.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netpulse_types::LatencySample;
use tokio::net::TcpStream;
use tokio::process::Command;

/// Measures a single round trip to a target.
///
/// Implementations never fail: a timeout, an unreachable host, or a probe
/// that could not be started all yield [`LatencySample::timeout`]. Each call
/// is independent, so a probe may be invoked concurrently.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration) -> LatencySample;
}

/// Echo probe backed by the platform `ping` utility.
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            program: "ping".to_string(),
        }
    }

    /// Use a different executable with `ping`-compatible arguments and output.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, target: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.program);

        if cfg!(windows) {
            let ms = timeout.as_millis().max(1).to_string();
            cmd.args(["-n", "1", "-w", &ms, target]);
        } else if cfg!(target_os = "macos") {
            let ms = timeout.as_millis().max(1).to_string();
            cmd.args(["-c", "1", "-W", &ms, target]);
        } else {
            // iputils takes whole seconds
            let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
            cmd.args(["-c", "1", "-W", &secs.to_string(), target]);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LatencyProbe for PingProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> LatencySample {
        let child = match self.command(target, timeout).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "failed to start echo probe");
                return LatencySample::timeout();
            }
        };

        // The child is killed if the deadline drops the future.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(target, error = %e, "echo probe failed");
                return LatencySample::timeout();
            }
            Err(_) => {
                tracing::debug!(target, timeout_ms = timeout.as_millis() as u64, "echo probe timed out");
                return LatencySample::timeout();
            }
        };

        if !output.status.success() {
            return LatencySample::timeout();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ping_time(&stdout) {
            Some(ms) => LatencySample::measured(ms),
            None => LatencySample::timeout(),
        }
    }
}

/// Extract the round trip from `ping` output.
///
/// Understands `time=14.2 ms`, `time=14ms` and the Windows `time<1ms` form,
/// which is reported as 1 ms.
pub fn parse_ping_time(output: &str) -> Option<f64> {
    for line in output.lines() {
        if let Some(idx) = line.find("time=") {
            let rest = &line[idx + 5..];
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if let Ok(ms) = rest[..end].parse::<f64>() {
                return Some(ms);
            }
        } else if line.contains("time<1ms") {
            return Some(1.0);
        }
    }
    None
}

/// Round trip measured as the time to complete a TCP handshake.
///
/// Useful where ICMP is filtered or no `ping` utility is installed. Targets
/// without a port use `default_port`.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    default_port: u16,
}

impl TcpConnectProbe {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    fn address(&self, target: &str) -> String {
        if target.parse::<std::net::SocketAddr>().is_ok() {
            return target.to_string();
        }
        match target.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
                target.to_string()
            }
            _ if target.contains(':') => format!("[{}]:{}", target, self.default_port),
            _ => format!("{}:{}", target, self.default_port),
        }
    }
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self::new(443)
    }
}

#[async_trait]
impl LatencyProbe for TcpConnectProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> LatencySample {
        let addr = self.address(target);
        let started = Instant::now();

        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => LatencySample::measured(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "connect probe failed");
                LatencySample::timeout()
            }
            Err(_) => LatencySample::timeout(),
        }
    }
}
