//! Output backends for published snapshots.
//!
//! An [`Output`] describes a destination. When the scheduler starts, each
//! output is activated into a sink whose `emit` never blocks: channels use
//! `try_send`, and file, TCP and subscriber outputs hand the snapshot to
//! their own task through a latest-value slot, so a slow disk, peer or
//! callback only ever misses intermediate snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use netpulse_types::TelemetrySnapshot;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

#[cfg(feature = "prometheus")]
use crate::prometheus::{PrometheusConfig, PrometheusExporter};
#[cfg(feature = "prometheus")]
use crate::task::AbortOnDrop;

/// Receives every published snapshot.
///
/// Each subscriber is driven by its own delivery task and the callback runs
/// on tokio's blocking pool, so it may block. Calls are sequential; while
/// one is running, newer snapshots replace older undelivered ones.
pub trait Subscriber: Send + Sync {
    fn on_snapshot(&self, snapshot: TelemetrySnapshot);
}

impl<F> Subscriber for F
where
    F: Fn(TelemetrySnapshot) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: TelemetrySnapshot) {
        self(snapshot)
    }
}

/// Output destination for snapshots.
pub enum Output {
    /// Write snapshots to a JSON file.
    ///
    /// The file is overwritten with each snapshot.
    File(PathBuf),

    /// Send snapshots to a TCP server.
    ///
    /// Each snapshot is sent as a newline-delimited JSON message.
    Tcp(String),

    /// Send snapshots through a bounded channel.
    ///
    /// Snapshots are dropped while the channel is full.
    Channel(mpsc::Sender<TelemetrySnapshot>),

    /// Keep only the latest snapshot in a watch channel.
    Watch(watch::Sender<Option<TelemetrySnapshot>>),

    /// Call a subscriber for each snapshot.
    Subscriber(Arc<dyn Subscriber>),

    /// Serve the latest snapshot in Prometheus exposition format.
    #[cfg(feature = "prometheus")]
    Prometheus(Arc<PrometheusExporter>),
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::File(path) => f.debug_tuple("File").field(path).finish(),
            Output::Tcp(addr) => f.debug_tuple("Tcp").field(addr).finish(),
            Output::Channel(_) => f.write_str("Channel"),
            Output::Watch(_) => f.write_str("Watch"),
            Output::Subscriber(_) => f.write_str("Subscriber"),
            #[cfg(feature = "prometheus")]
            Output::Prometheus(exporter) => f.debug_tuple("Prometheus").field(exporter).finish(),
        }
    }
}

impl Output {
    /// Create a file output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netpulse_sdk::Output;
    ///
    /// let output = Output::file("netpulse.json");
    /// ```
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Output::File(path.into())
    }

    /// Create a TCP output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netpulse_sdk::Output;
    ///
    /// let output = Output::tcp("localhost:9090");
    /// ```
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netpulse_sdk::Output;
    ///
    /// let (output, mut rx) = Output::channel(16);
    ///
    /// // Later, receive snapshots
    /// // while let Some(snapshot) = rx.recv().await {
    /// //     println!("sequence {}", snapshot.sequence);
    /// // }
    /// ```
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TelemetrySnapshot>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Create a latest-value output and return the receiver.
    ///
    /// The receiver holds `None` until the first publish.
    pub fn watch() -> (Self, watch::Receiver<Option<TelemetrySnapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Output::Watch(tx), rx)
    }

    /// Wrap a subscriber.
    pub fn subscriber(subscriber: impl Subscriber + 'static) -> Self {
        Output::Subscriber(Arc::new(subscriber))
    }

    /// Create a Prometheus output.
    #[cfg(feature = "prometheus")]
    pub fn prometheus(config: PrometheusConfig) -> Self {
        Output::Prometheus(Arc::new(PrometheusExporter::new(config)))
    }

    /// Turn this description into a sink for one scheduler run.
    ///
    /// File, TCP and subscriber outputs spawn their task here, so this must
    /// be called inside a tokio runtime for those variants.
    pub(crate) fn activate(&self) -> Sink {
        match self {
            Output::File(path) => {
                let (tx, rx) = watch::channel(None);
                tokio::spawn(file_writer(path.clone(), rx));
                Sink::Writer(tx)
            }
            Output::Tcp(addr) => {
                let (tx, rx) = watch::channel(None);
                tokio::spawn(tcp_writer(addr.clone(), rx));
                Sink::Writer(tx)
            }
            Output::Channel(tx) => Sink::Channel(tx.clone()),
            Output::Watch(tx) => Sink::Watch(tx.clone()),
            Output::Subscriber(subscriber) => {
                let (tx, rx) = watch::channel(None);
                tokio::spawn(deliver(subscriber.clone(), rx));
                Sink::Writer(tx)
            }
            #[cfg(feature = "prometheus")]
            Output::Prometheus(exporter) => {
                let server = AbortOnDrop::new(exporter.start_server());
                Sink::Prometheus(exporter.clone(), server)
            }
        }
    }
}

/// An activated output.
pub(crate) enum Sink {
    Writer(watch::Sender<Option<TelemetrySnapshot>>),
    Channel(mpsc::Sender<TelemetrySnapshot>),
    Watch(watch::Sender<Option<TelemetrySnapshot>>),
    /// The server task stops when the sink is released.
    #[cfg(feature = "prometheus")]
    Prometheus(Arc<PrometheusExporter>, AbortOnDrop<()>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Sink::Writer(_) => "Writer",
            Sink::Channel(_) => "Channel",
            Sink::Watch(_) => "Watch",
            #[cfg(feature = "prometheus")]
            Sink::Prometheus(..) => "Prometheus",
        };
        f.write_str(name)
    }
}

impl Sink {
    /// Hand a snapshot to this sink without blocking.
    pub(crate) fn emit(&self, snapshot: &TelemetrySnapshot) {
        match self {
            Sink::Writer(tx) | Sink::Watch(tx) => {
                tx.send_replace(Some(snapshot.clone()));
            }
            Sink::Channel(tx) => {
                // Best effort send (don't block if channel is full)
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(snapshot.clone()) {
                    tracing::debug!(sequence = snapshot.sequence, "channel full, snapshot dropped");
                }
            }
            #[cfg(feature = "prometheus")]
            Sink::Prometheus(exporter, _) => exporter.record(snapshot),
        }
    }
}

/// Call `subscriber` with each new snapshot until the sink is dropped.
async fn deliver(
    subscriber: Arc<dyn Subscriber>,
    mut rx: watch::Receiver<Option<TelemetrySnapshot>>,
) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };

        let subscriber = subscriber.clone();
        let sequence = snapshot.sequence;
        if let Err(e) = tokio::task::spawn_blocking(move || subscriber.on_snapshot(snapshot)).await {
            tracing::warn!(sequence, error = %e, "subscriber panicked");
        }
    }
}

/// Overwrite `path` with each new snapshot until the sink is dropped.
async fn file_writer(path: PathBuf, mut rx: watch::Receiver<Option<TelemetrySnapshot>>) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };

        let result = match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => tokio::fs::write(&path, json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot");
        }
    }
}

/// Stream each new snapshot to `addr`, reconnecting after failures.
async fn tcp_writer(addr: String, mut rx: watch::Receiver<Option<TelemetrySnapshot>>) {
    let mut stream: Option<TcpStream> = None;

    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };
        let mut line = match serde_json::to_vec(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode snapshot");
                continue;
            }
        };
        line.push(b'\n');

        if stream.is_none() {
            match TcpStream::connect(&addr).await {
                Ok(s) => stream = Some(s),
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp output unavailable");
                    continue;
                }
            }
        }

        if let Some(s) = stream.as_mut() {
            if let Err(e) = s.write_all(&line).await {
                tracing::debug!(%addr, error = %e, "tcp output disconnected");
                stream = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncBufReadExt;

    fn snapshot(sequence: u64) -> TelemetrySnapshot {
        TelemetrySnapshot::builder()
            .sequence(sequence)
            .timestamp_ms(1_700_000_000_000)
            .build()
    }

    #[test]
    fn channel_never_blocks_when_full() {
        let (output, mut rx) = Output::channel(1);
        let sink = output.activate();

        sink.emit(&snapshot(1));
        sink.emit(&snapshot(2));

        assert_eq!(rx.try_recv().unwrap().sequence, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn watch_keeps_latest() {
        let (output, rx) = Output::watch();
        let sink = output.activate();
        assert!(rx.borrow().is_none());

        sink.emit(&snapshot(1));
        sink.emit(&snapshot(2));

        assert_eq!(rx.borrow().as_ref().unwrap().sequence, 2);
    }

    async fn wait_for(seen: &AtomicU64, sequence: u64) {
        for _ in 0..300 {
            if seen.load(Ordering::SeqCst) == sequence {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscriber never saw sequence {}", sequence);
    }

    #[tokio::test]
    async fn subscriber_gets_a_copy() {
        let seen = Arc::new(AtomicU64::new(0));
        let recorder = seen.clone();
        let output = Output::subscriber(move |s: TelemetrySnapshot| {
            recorder.store(s.sequence, Ordering::SeqCst);
        });

        let sink = output.activate();
        sink.emit(&snapshot(7));
        wait_for(&seen, 7).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_subscriber_never_blocks_emit() {
        let seen = Arc::new(AtomicU64::new(0));
        let recorder = seen.clone();
        let output = Output::subscriber(move |s: TelemetrySnapshot| {
            std::thread::sleep(Duration::from_millis(300));
            recorder.store(s.sequence, Ordering::SeqCst);
        });
        let sink = output.activate();

        let started = std::time::Instant::now();
        for sequence in 1..=20 {
            sink.emit(&snapshot(sequence));
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        // the callback catches up with the newest snapshot
        wait_for(&seen, 20).await;
    }

    #[tokio::test]
    async fn file_output_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netpulse.json");

        let sink = Output::file(&path).activate();
        sink.emit(&snapshot(3));

        let mut contents = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(c) = tokio::fs::read_to_string(&path).await {
                if !c.is_empty() {
                    contents = c;
                    break;
                }
            }
        }

        let parsed: TelemetrySnapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.sequence, 3);
    }

    #[tokio::test]
    async fn tcp_output_sends_json_lines() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = Output::tcp(addr.to_string()).activate();
        sink.emit(&snapshot(1));

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = tokio::io::BufReader::new(stream).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let parsed: TelemetrySnapshot = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.sequence, 1);

        sink.emit(&snapshot(2));
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("\"sequence\":2"));
    }

    #[test]
    fn debug_names_variants() {
        assert_eq!(format!("{:?}", Output::tcp("localhost:1")), "Tcp(\"localhost:1\")");
        let (output, _rx) = Output::channel(1);
        assert_eq!(format!("{:?}", output), "Channel");
    }
}
