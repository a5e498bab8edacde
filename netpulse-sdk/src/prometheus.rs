//! Prometheus exposition format support.
//!
//! The latest snapshot is rendered as a set of gauges and served over HTTP,
//! so Prometheus or any compatible scraper can poll the host's throughput,
//! latency and addressing.
//!
//! ## Example
//!
//! ```rust,no_run
//! use netpulse_sdk::{Output, Scheduler};
//! use netpulse_sdk::prometheus::PrometheusConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PrometheusConfig::builder()
//!         .listen_addr("0.0.0.0:9464")
//!         .metrics_path("/metrics")
//!         .build();
//!
//!     let handle = Scheduler::builder()
//!         .output(Output::prometheus(config))
//!         .build()
//!         .start();
//!
//!     // Metrics available at http://localhost:9464/metrics
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown().await;
//! }
//! ```

use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use netpulse_types::TelemetrySnapshot;
use parking_lot::RwLock;
use tokio::net::TcpListener;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9464";
const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Configuration for Prometheus metrics endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Address to listen on (e.g., "0.0.0.0:9464")
    pub listen_addr: String,
    /// Path for metrics endpoint (e.g., "/metrics")
    pub metrics_path: String,
    /// Optional namespace prefix for all metrics
    pub namespace: Option<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            namespace: None,
        }
    }
}

impl PrometheusConfig {
    /// Create a new builder for PrometheusConfig.
    pub fn builder() -> PrometheusConfigBuilder {
        PrometheusConfigBuilder::default()
    }
}

/// Builder for PrometheusConfig.
#[derive(Debug, Default)]
pub struct PrometheusConfigBuilder {
    listen_addr: Option<String>,
    metrics_path: Option<String>,
    namespace: Option<String>,
}

impl PrometheusConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    /// Set the namespace prefix for all metrics.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn build(self) -> PrometheusConfig {
        PrometheusConfig {
            listen_addr: self
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            metrics_path: self
                .metrics_path
                .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string()),
            namespace: self.namespace,
        }
    }
}

type SnapshotSlot = Arc<RwLock<Option<TelemetrySnapshot>>>;

/// Prometheus exporter that serves the latest snapshot over HTTP.
#[derive(Debug)]
pub struct PrometheusExporter {
    config: PrometheusConfig,
    latest_snapshot: SnapshotSlot,
}

impl PrometheusExporter {
    pub fn new(config: PrometheusConfig) -> Self {
        Self {
            config,
            latest_snapshot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &PrometheusConfig {
        &self.config
    }

    /// Replace the snapshot served to scrapers.
    pub fn record(&self, snapshot: &TelemetrySnapshot) {
        *self.latest_snapshot.write() = Some(snapshot.clone());
    }

    /// Current metrics in exposition format; empty before the first snapshot.
    pub fn render(&self) -> String {
        render_slot(&self.latest_snapshot, self.config.namespace.as_deref())
    }

    /// Start the HTTP server in a background task.
    ///
    /// The server runs until the returned handle is aborted or the runtime
    /// shuts down. Bind failures are logged, not returned.
    pub fn start_server(&self) -> tokio::task::JoinHandle<()> {
        let listen_addr = self.config.listen_addr.clone();
        let metrics_path = self.config.metrics_path.clone();
        let namespace = self.config.namespace.clone();
        let snapshot_storage = self.latest_snapshot.clone();

        tokio::spawn(async move {
            if let Err(e) = run_server(&listen_addr, metrics_path, namespace, snapshot_storage).await
            {
                tracing::error!(addr = %listen_addr, error = %e, "prometheus server stopped");
            }
        })
    }
}

async fn run_server(
    listen_addr: &str,
    metrics_path: String,
    namespace: Option<String>,
    snapshot_storage: SnapshotSlot,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = listen_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, path = %metrics_path, "serving prometheus metrics");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let metrics_path = metrics_path.clone();
        let namespace = namespace.clone();
        let snapshot_storage = snapshot_storage.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = respond(
                    req.uri().path(),
                    &metrics_path,
                    namespace.as_deref(),
                    &snapshot_storage,
                );
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "prometheus connection error");
            }
        });
    }
}

fn respond(
    path: &str,
    metrics_path: &str,
    namespace: Option<&str>,
    snapshot_storage: &SnapshotSlot,
) -> Response<Full<Bytes>> {
    if path == metrics_path {
        text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            render_slot(snapshot_storage, namespace),
        )
    } else if path == "/health" || path == "/healthz" {
        text_response(StatusCode::OK, "text/plain", "OK".into())
    } else {
        text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".into())
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn render_slot(slot: &SnapshotSlot, namespace: Option<&str>) -> String {
    match slot.read().as_ref() {
        Some(s) => format_prometheus(s, namespace),
        None => String::new(),
    }
}

/// Format a snapshot as Prometheus exposition format.
///
/// Latency is only emitted once a probe has run: `latency_ms` when it got a
/// reply, `latency_timeout 1` when it did not.
pub fn format_prometheus(snapshot: &TelemetrySnapshot, namespace: Option<&str>) -> String {
    let mut out = String::new();
    let prefix = match namespace {
        Some(ns) => format!("{ns}_netpulse_"),
        None => "netpulse_".to_string(),
    };

    let mut gauge = |name: &str, help: &str, labels: Option<String>, value: String| {
        let _ = writeln!(out, "# HELP {prefix}{name} {help}");
        let _ = writeln!(out, "# TYPE {prefix}{name} gauge");
        match labels {
            Some(labels) => {
                let _ = writeln!(out, "{prefix}{name}{{{labels}}} {value}");
            }
            None => {
                let _ = writeln!(out, "{prefix}{name} {value}");
            }
        }
    };

    gauge(
        "download_kbps",
        "Receive rate summed over all interfaces, in KB/s",
        None,
        format!("{:.3}", snapshot.rate.download_kbps),
    );
    gauge(
        "upload_kbps",
        "Send rate summed over all interfaces, in KB/s",
        None,
        format!("{:.3}", snapshot.rate.upload_kbps),
    );

    if let Some(latency) = snapshot.latency {
        let timed_out = latency.round_trip_ms.is_none();
        if let Some(ms) = latency.round_trip_ms {
            gauge(
                "latency_ms",
                "Round trip of the last echo probe, in milliseconds",
                None,
                format!("{ms:.3}"),
            );
        }
        gauge(
            "latency_timeout",
            "1 if the last echo probe got no reply",
            None,
            u8::from(timed_out).to_string(),
        );
    }

    let network = &snapshot.network;
    let labels = format!(
        "local_ip=\"{}\",public_ip=\"{}\",gateway=\"{}\",dns=\"{}\"",
        escape_label_value(network.local_ip_or_unknown()),
        escape_label_value(network.public_ip_or_unknown()),
        escape_label_value(network.gateway_or_unknown()),
        escape_label_value(&network.dns_display()),
    );
    gauge(
        "network_info",
        "Addressing of the host; the value is always 1",
        Some(labels),
        "1".to_string(),
    );

    gauge(
        "sequence",
        "Sequence number of the served snapshot",
        None,
        snapshot.sequence.to_string(),
    );
    gauge(
        "snapshot_timestamp_seconds",
        "Unix timestamp of the snapshot",
        None,
        format!("{:.3}", snapshot.timestamp_ms as f64 / 1000.0),
    );

    out
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
