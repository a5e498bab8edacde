use std::io;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use netpulse::sink::{print_snapshots, SnapshotFormat};
use netpulse::{render, Overrides, Settings};
use netpulse_sdk::{Output, Scheduler, SpeedTestController, SpeedTestResult};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netpulse", version)]
#[command(about = "Headless network telemetry: bandwidth, latency, addressing and speed tests")]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a snapshot per publish until interrupted (default)
    Watch(WatchArgs),

    /// Resolve local IP, public IP, gateway and DNS servers once
    Info {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run one speed test; exits non-zero if it fails
    Speedtest {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
struct WatchArgs {
    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Sampling period (e.g., "1s", "500ms")
    #[arg(long)]
    fast_interval: Option<String>,

    /// Network info refresh period (e.g., "60s")
    #[arg(long)]
    slow_interval: Option<String>,

    /// Host probed for latency
    #[arg(long)]
    target: Option<String>,

    /// Also write each snapshot to this JSON file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Also stream JSON lines to this TCP address (host:port)
    #[arg(long)]
    tcp: Option<String>,

    /// Serve Prometheus metrics on this address (e.g., "0.0.0.0:9464")
    #[arg(long, value_name = "ADDR")]
    prometheus: Option<String>,
}

impl WatchArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            fast_interval: self.fast_interval.clone(),
            slow_interval: self.slow_interval.clone(),
            latency_target: self.target.clone(),
            output_file: self.file.clone(),
            output_tcp: self.tcp.clone(),
            prometheus: self.prometheus.clone(),
        }
    }

    fn format(&self) -> SnapshotFormat {
        if self.json {
            SnapshotFormat::Json
        } else {
            SnapshotFormat::Text
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or_else(|| Command::Watch(WatchArgs::default())) {
        Command::Watch(args) => {
            let settings = Settings::load(config_path, &args.overrides())?;
            watch(settings, args.format()).await
        }
        Command::Info { json } => {
            let settings = Settings::load(config_path, &Overrides::default())?;
            info(&settings, json).await
        }
        Command::Speedtest { json } => {
            let settings = Settings::load(config_path, &Overrides::default())?;
            speedtest(&settings, json).await
        }
    }
}

/// Logs go to stderr so stdout stays machine readable.
fn init_tracing(verbose: bool) {
    let default = if verbose { "netpulse=debug" } else { "netpulse=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Run the scheduler until Ctrl-C.
async fn watch(settings: Settings, format: SnapshotFormat) -> Result<()> {
    let (output, rx) = Output::channel(64);

    let mut builder = Scheduler::builder()
        .output(output)
        .fast_interval(settings.fast_interval)
        .slow_interval(settings.slow_interval)
        .shutdown_grace(settings.shutdown_grace)
        .latency_target(&settings.latency.target)
        .latency_timeout(settings.latency.timeout)
        .resolver(settings.resolver());

    if let Some(path) = &settings.output.file {
        builder = builder.output(Output::file(path));
    }
    if let Some(addr) = &settings.output.tcp {
        builder = builder.output(Output::tcp(addr));
    }
    if let Some(addr) = &settings.output.prometheus {
        builder = with_prometheus(builder, addr);
    }

    let handle = builder.build().start();
    let mut printer = tokio::spawn(print_snapshots(rx, io::stdout(), format));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, shutting down");
        }
        result = &mut printer => {
            handle.shutdown().await;
            result??;
            return Ok(());
        }
    }

    handle.shutdown().await;
    let printed = printer.await??;
    tracing::debug!(printed, "stdout sink closed");
    Ok(())
}

#[cfg(feature = "prometheus")]
fn with_prometheus(builder: netpulse_sdk::SchedulerBuilder, addr: &str) -> netpulse_sdk::SchedulerBuilder {
    use netpulse_sdk::PrometheusConfig;

    builder.output(Output::prometheus(
        PrometheusConfig::builder().listen_addr(addr).build(),
    ))
}

#[cfg(not(feature = "prometheus"))]
fn with_prometheus(builder: netpulse_sdk::SchedulerBuilder, addr: &str) -> netpulse_sdk::SchedulerBuilder {
    tracing::warn!(%addr, "built without the `prometheus` feature, ignoring prometheus output");
    builder
}

/// Resolve network info once.
async fn info(settings: &Settings, json: bool) -> Result<()> {
    let scheduler = Scheduler::builder().resolver(settings.resolver()).build();
    let info = scheduler.resolve_now().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print!("{}", render::network_block(&info));
    }
    Ok(())
}

/// Run one speed test, reporting phases on stderr.
async fn speedtest(settings: &Settings, json: bool) -> Result<()> {
    let controller =
        SpeedTestController::new(settings.speed_test()).with_context(settings.resolver());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = controller.start_with_progress(tx)?;
    tokio::spawn(async move {
        while let Some(phase) = rx.recv().await {
            tracing::info!(phase = phase.label(), "speed test");
        }
    });

    let result = tokio::select! {
        result = task.result() => result,
        _ = tokio::signal::ctrl_c() => SpeedTestResult::failed("interrupted"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_completed() {
        print!("{}", render::speed_test_block(&result));
    }

    match result.error() {
        Some(error) => bail!("speed test failed: {}", error),
        None => Ok(()),
    }
}
