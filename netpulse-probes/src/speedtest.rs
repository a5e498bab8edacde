//! One-shot speed test.
//!
//! The benchmark protocol lives behind [`SpeedTestProvider`]; the
//! [`SpeedTestRunner`] drives the steps in order and turns the outcome into a
//! [`SpeedTestResult`]. A run that fails at any step reports only the error.
//!
//! [`HttpSpeedTest`] is a provider for servers exposing the
//! `/__down?bytes=N` and `/__up` endpoints, such as
//! `speed.cloudflare.com`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use netpulse_types::{SpeedTestReport, SpeedTestResult};
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ProbeError;
use crate::resolver::NetworkInfoResolver;

/// Bits per second in one Mbps.
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;

pub const DEFAULT_SERVER_URL: &str = "https://speed.cloudflare.com";
pub const DEFAULT_DOWNLOAD_BYTES: u64 = 10_000_000;
pub const DEFAULT_UPLOAD_BYTES: usize = 5_000_000;
pub const DEFAULT_PING_SAMPLES: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A candidate benchmark server.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkServer {
    pub name: String,
    pub url: String,
}

impl BenchmarkServer {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// A speed-test backend.
///
/// Throughput is reported in bits per second; the runner converts to Mbps.
#[async_trait]
pub trait SpeedTestProvider: Send + Sync {
    /// Pick the server with the lowest latency.
    async fn discover_best_server(&self) -> Result<BenchmarkServer, ProbeError>;

    /// Baseline round trip to `server`, in milliseconds.
    async fn ping(&self, server: &BenchmarkServer) -> Result<f64, ProbeError>;

    async fn download(&self, server: &BenchmarkServer) -> Result<f64, ProbeError>;

    async fn upload(&self, server: &BenchmarkServer) -> Result<f64, ProbeError>;
}

#[async_trait]
impl<T: SpeedTestProvider + ?Sized> SpeedTestProvider for std::sync::Arc<T> {
    async fn discover_best_server(&self) -> Result<BenchmarkServer, ProbeError> {
        (**self).discover_best_server().await
    }

    async fn ping(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        (**self).ping(server).await
    }

    async fn download(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        (**self).download(server).await
    }

    async fn upload(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        (**self).upload(server).await
    }
}

/// Step a running speed test has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTestPhase {
    Discovering,
    Ping,
    Download,
    Upload,
    Completed,
    Failed,
}

impl SpeedTestPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SpeedTestPhase::Discovering => "discovering server",
            SpeedTestPhase::Ping => "measuring ping",
            SpeedTestPhase::Download => "measuring download",
            SpeedTestPhase::Upload => "measuring upload",
            SpeedTestPhase::Completed => "completed",
            SpeedTestPhase::Failed => "failed",
        }
    }
}

/// Runs the steps of a speed test against a provider.
pub struct SpeedTestRunner<P> {
    provider: P,
    context: Option<NetworkInfoResolver>,
    progress: Option<UnboundedSender<SpeedTestPhase>>,
}

impl<P: SpeedTestProvider> SpeedTestRunner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            context: None,
            progress: None,
        }
    }

    /// Attach local IP and DNS server from `resolver` to completed reports.
    pub fn with_context(mut self, resolver: NetworkInfoResolver) -> Self {
        self.context = Some(resolver);
        self
    }

    /// Report phase changes on `tx`.
    pub fn with_progress(mut self, tx: UnboundedSender<SpeedTestPhase>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Run discovery, ping, download and upload in order.
    pub async fn run(&self) -> SpeedTestResult {
        match self.measure().await {
            Ok(mut report) => {
                if let Some(resolver) = &self.context {
                    let (local_ip, dns) =
                        tokio::join!(resolver.resolve_local_ip(), resolver.resolve_dns_servers());
                    report.local_ip = local_ip;
                    report.dns_server = dns.into_iter().next();
                }

                tracing::info!(
                    server = %report.server,
                    ping_ms = report.ping_ms,
                    download_mbps = report.download_mbps,
                    upload_mbps = report.upload_mbps,
                    "speed test complete"
                );
                self.report(SpeedTestPhase::Completed);
                SpeedTestResult::Completed(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "speed test failed");
                self.report(SpeedTestPhase::Failed);
                SpeedTestResult::failed(e.to_string())
            }
        }
    }

    async fn measure(&self) -> Result<SpeedTestReport, ProbeError> {
        self.report(SpeedTestPhase::Discovering);
        let server = self
            .provider
            .discover_best_server()
            .await
            .map_err(|e| step_failed("server discovery", e))?;
        tracing::debug!(server = %server.name, "selected benchmark server");

        self.report(SpeedTestPhase::Ping);
        let ping_ms = self
            .provider
            .ping(&server)
            .await
            .map_err(|e| step_failed("ping", e))?;

        self.report(SpeedTestPhase::Download);
        let download = self
            .provider
            .download(&server)
            .await
            .map_err(|e| step_failed("download", e))?;

        self.report(SpeedTestPhase::Upload);
        let upload = self
            .provider
            .upload(&server)
            .await
            .map_err(|e| step_failed("upload", e))?;

        Ok(SpeedTestReport {
            server: server.name,
            ping_ms: checked("ping", ping_ms)?,
            download_mbps: checked("download", download)? / BITS_PER_MEGABIT,
            upload_mbps: checked("upload", upload)? / BITS_PER_MEGABIT,
            local_ip: None,
            dns_server: None,
        })
    }

    fn report(&self, phase: SpeedTestPhase) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(phase);
        }
    }
}

fn step_failed(step: &str, err: ProbeError) -> ProbeError {
    match err {
        ProbeError::MeasurementFailure(msg) => ProbeError::MeasurementFailure(format!("{step}: {msg}")),
        other => ProbeError::MeasurementFailure(format!("{step}: {other}")),
    }
}

fn checked(step: &str, value: f64) -> Result<f64, ProbeError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ProbeError::MeasurementFailure(format!(
            "{step}: invalid measurement {value}"
        )))
    }
}

/// Provider for HTTP speed endpoints (`/__down?bytes=N`, `/__up`).
#[derive(Debug, Clone)]
pub struct HttpSpeedTest {
    client: Client,
    servers: Vec<BenchmarkServer>,
    download_bytes: u64,
    upload_bytes: usize,
    ping_samples: usize,
}

impl HttpSpeedTest {
    pub fn builder() -> HttpSpeedTestBuilder {
        HttpSpeedTestBuilder::default()
    }

    pub fn servers(&self) -> &[BenchmarkServer] {
        &self.servers
    }

    /// One zero-byte round trip, in milliseconds.
    async fn round_trip(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        let url = format!("{}/__down?bytes=0", server.url);
        let started = Instant::now();

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Http(format!(
                "{} returned {}",
                server.name,
                response.status()
            )));
        }
        response.bytes().await?;

        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }
}

impl Default for HttpSpeedTest {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
impl SpeedTestProvider for HttpSpeedTest {
    async fn discover_best_server(&self) -> Result<BenchmarkServer, ProbeError> {
        let mut best: Option<(f64, &BenchmarkServer)> = None;

        for server in &self.servers {
            match self.round_trip(server).await {
                Ok(ms) => {
                    tracing::debug!(server = %server.name, latency_ms = ms, "probed server");
                    if best.map_or(true, |(best_ms, _)| ms < best_ms) {
                        best = Some((ms, server));
                    }
                }
                Err(e) => tracing::debug!(server = %server.name, error = %e, "server unreachable"),
            }
        }

        best.map(|(_, server)| server.clone())
            .ok_or_else(|| ProbeError::Unresolvable("no benchmark server reachable".to_string()))
    }

    async fn ping(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        let mut samples = Vec::with_capacity(self.ping_samples);
        for _ in 0..self.ping_samples.max(1) {
            samples.push(self.round_trip(server).await?);
        }
        Ok(median(&mut samples))
    }

    async fn download(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        let url = format!("{}/__down?bytes={}", server.url, self.download_bytes);
        let started = Instant::now();

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Http(format!(
                "download returned {}",
                response.status()
            )));
        }

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
        }

        bits_per_second(received, started.elapsed())
    }

    async fn upload(&self, server: &BenchmarkServer) -> Result<f64, ProbeError> {
        let url = format!("{}/__up", server.url);
        let payload: Vec<u8> = (0..self.upload_bytes).map(|i| (i % 256) as u8).collect();
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProbeError::Http(format!("upload returned {}", response.status())));
        }
        response.bytes().await?;

        bits_per_second(self.upload_bytes as u64, started.elapsed())
    }
}

fn bits_per_second(bytes: u64, elapsed: Duration) -> Result<f64, ProbeError> {
    if bytes == 0 {
        return Err(ProbeError::MeasurementFailure("no data transferred".to_string()));
    }
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return Err(ProbeError::ClockAnomaly(
            "transfer completed too fast to measure".to_string(),
        ));
    }
    Ok(bytes as f64 * 8.0 / secs)
}

fn median(samples: &mut [f64]) -> f64 {
    samples.sort_by(f64::total_cmp);
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}

/// Builder for [`HttpSpeedTest`].
#[derive(Debug, Default)]
pub struct HttpSpeedTestBuilder {
    servers: Vec<BenchmarkServer>,
    download_bytes: Option<u64>,
    upload_bytes: Option<usize>,
    ping_samples: Option<usize>,
    timeout: Option<Duration>,
}

impl HttpSpeedTestBuilder {
    /// Add a candidate server. Without any, `speed.cloudflare.com` is used.
    pub fn server(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.servers.push(BenchmarkServer::new(name, url));
        self
    }

    /// Payload size for the download measurement (default: 10 MB).
    pub fn download_bytes(mut self, bytes: u64) -> Self {
        self.download_bytes = Some(bytes);
        self
    }

    /// Payload size for the upload measurement (default: 5 MB).
    pub fn upload_bytes(mut self, bytes: usize) -> Self {
        self.upload_bytes = Some(bytes);
        self
    }

    /// Round trips whose median is the reported ping (default: 5).
    pub fn ping_samples(mut self, samples: usize) -> Self {
        self.ping_samples = Some(samples);
        self
    }

    /// Per-request timeout (default: 60 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> HttpSpeedTest {
        let timeout = self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            Client::new()
        });

        let servers = if self.servers.is_empty() {
            vec![BenchmarkServer::new("speed.cloudflare.com", DEFAULT_SERVER_URL)]
        } else {
            self.servers
        };

        HttpSpeedTest {
            client,
            servers,
            download_bytes: self.download_bytes.unwrap_or(DEFAULT_DOWNLOAD_BYTES),
            upload_bytes: self.upload_bytes.unwrap_or(DEFAULT_UPLOAD_BYTES),
            ping_samples: self.ping_samples.unwrap_or(DEFAULT_PING_SAMPLES),
        }
    }
}
