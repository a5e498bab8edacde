//! Layered settings for the `netpulse` binary.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`--config netpulse.toml`)
//! 3. `NETPULSE_*` environment variables, with `__` between nested keys
//!    (`NETPULSE_LATENCY__TARGET=1.1.1.1`)
//! 4. command-line flags
//!
//! ```toml
//! fast_interval = "1s"
//! slow_interval = "60s"
//!
//! [latency]
//! target = "1.1.1.1"
//! timeout = "1s"
//!
//! [resolver]
//! public_ip_url = "https://api.ipify.org?format=json"
//!
//! [output]
//! file = "netpulse.json"
//!
//! [[speedtest.servers]]
//! name = "cloudflare"
//! url = "https://speed.cloudflare.com"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use netpulse_probes::resolver::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_PUBLIC_IP_TIMEOUT, DEFAULT_PUBLIC_IP_URL};
use netpulse_probes::speedtest::{
    DEFAULT_DOWNLOAD_BYTES, DEFAULT_PING_SAMPLES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL,
    DEFAULT_UPLOAD_BYTES,
};
use netpulse_probes::{HttpSpeedTest, NetworkInfoResolver};
use netpulse_sdk::{
    DEFAULT_FAST_INTERVAL, DEFAULT_LATENCY_TARGET, DEFAULT_LATENCY_TIMEOUT,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_SLOW_INTERVAL,
};
use serde::{Deserialize, Serialize};

use crate::duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(with = "duration")]
    pub fast_interval: Duration,
    #[serde(with = "duration")]
    pub slow_interval: Duration,
    #[serde(with = "duration")]
    pub shutdown_grace: Duration,
    pub latency: LatencySettings,
    pub resolver: ResolverSettings,
    pub speedtest: SpeedTestSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySettings {
    pub target: String,
    #[serde(with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub public_ip_url: String,
    #[serde(with = "duration")]
    pub public_ip_timeout: Duration,
    #[serde(with = "duration")]
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestSettings {
    pub servers: Vec<ServerSettings>,
    pub download_bytes: u64,
    pub upload_bytes: usize,
    pub ping_samples: usize,
    #[serde(with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: String,
    pub url: String,
}

/// Extra destinations for snapshots, besides stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub file: Option<PathBuf>,
    pub tcp: Option<String>,
    /// Listen address for the Prometheus endpoint.
    pub prometheus: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fast_interval: DEFAULT_FAST_INTERVAL,
            slow_interval: DEFAULT_SLOW_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            latency: LatencySettings {
                target: DEFAULT_LATENCY_TARGET.to_string(),
                timeout: DEFAULT_LATENCY_TIMEOUT,
            },
            resolver: ResolverSettings {
                public_ip_url: DEFAULT_PUBLIC_IP_URL.to_string(),
                public_ip_timeout: DEFAULT_PUBLIC_IP_TIMEOUT,
                command_timeout: DEFAULT_COMMAND_TIMEOUT,
            },
            speedtest: SpeedTestSettings {
                servers: vec![ServerSettings {
                    name: "speed.cloudflare.com".to_string(),
                    url: DEFAULT_SERVER_URL.to_string(),
                }],
                download_bytes: DEFAULT_DOWNLOAD_BYTES,
                upload_bytes: DEFAULT_UPLOAD_BYTES,
                ping_samples: DEFAULT_PING_SAMPLES,
                timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            output: OutputSettings::default(),
        }
    }
}

/// Settings given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub fast_interval: Option<String>,
    pub slow_interval: Option<String>,
    pub latency_target: Option<String>,
    pub output_file: Option<PathBuf>,
    pub output_tcp: Option<String>,
    pub prometheus: Option<String>,
}

impl Settings {
    /// Merge every layer into a `Settings` value.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        Self::load_with_env(path, overrides, Environment::with_prefix("NETPULSE"))
    }

    fn load_with_env(path: Option<&Path>, overrides: &Overrides, env: Environment) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let output_file = overrides
            .output_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let config = builder
            .add_source(env.prefix_separator("_").separator("__"))
            .set_override_option("fast_interval", overrides.fast_interval.clone())?
            .set_override_option("slow_interval", overrides.slow_interval.clone())?
            .set_override_option("latency.target", overrides.latency_target.clone())?
            .set_override_option("output.file", output_file)?
            .set_override_option("output.tcp", overrides.output_tcp.clone())?
            .set_override_option("output.prometheus", overrides.prometheus.clone())?
            .build()
            .context("failed to read settings")?;

        config
            .try_deserialize()
            .context("invalid settings")
    }

    pub fn resolver(&self) -> NetworkInfoResolver {
        NetworkInfoResolver::builder()
            .public_ip_url(&self.resolver.public_ip_url)
            .public_ip_timeout(self.resolver.public_ip_timeout)
            .command_timeout(self.resolver.command_timeout)
            .build()
    }

    pub fn speed_test(&self) -> HttpSpeedTest {
        let mut builder = HttpSpeedTest::builder()
            .download_bytes(self.speedtest.download_bytes)
            .upload_bytes(self.speedtest.upload_bytes)
            .ping_samples(self.speedtest.ping_samples)
            .timeout(self.speedtest.timeout);
        for server in &self.speedtest.servers {
            builder = builder.server(&server.name, &server.url);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env() -> Environment {
        Environment::with_prefix("NETPULSE").source(Some(HashMap::new()))
    }

    #[test]
    fn defaults_round_trip_through_config() {
        let settings = Settings::load_with_env(None, &Overrides::default(), no_env()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.fast_interval, Duration::from_secs(1));
        assert_eq!(settings.slow_interval, Duration::from_secs(60));
        assert_eq!(settings.latency.target, "8.8.8.8");
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
fast_interval = "500ms"

[latency]
target = "1.1.1.1"

[output]
file = "/tmp/netpulse.json"
"#
        )
        .unwrap();

        let settings =
            Settings::load_with_env(Some(file.path()), &Overrides::default(), no_env()).unwrap();

        assert_eq!(settings.fast_interval, Duration::from_millis(500));
        assert_eq!(settings.latency.target, "1.1.1.1");
        assert_eq!(settings.latency.timeout, Duration::from_secs(1));
        assert_eq!(settings.output.file, Some(PathBuf::from("/tmp/netpulse.json")));
    }

    #[test]
    fn env_overrides_file_and_flags_override_env() {
        let env = Environment::with_prefix("NETPULSE").source(Some(HashMap::from([
            ("NETPULSE_SLOW_INTERVAL".to_string(), "30s".to_string()),
            ("NETPULSE_LATENCY__TARGET".to_string(), "9.9.9.9".to_string()),
        ])));
        let overrides = Overrides {
            latency_target: Some("1.0.0.1".into()),
            ..Default::default()
        };

        let settings = Settings::load_with_env(None, &overrides, env).unwrap();

        assert_eq!(settings.slow_interval, Duration::from_secs(30));
        assert_eq!(settings.latency.target, "1.0.0.1");
    }

    #[test]
    fn bad_duration_is_an_error() {
        let overrides = Overrides {
            fast_interval: Some("fast".into()),
            ..Default::default()
        };
        assert!(Settings::load_with_env(None, &overrides, no_env()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = Path::new("/nonexistent/netpulse.toml");
        assert!(Settings::load_with_env(Some(path), &Overrides::default(), no_env()).is_err());
    }
}
