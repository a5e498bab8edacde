//! Default gateway and DNS resolver discovery.
//!
//! Two variants exist, one per platform family. Each owns its commands, its
//! output parsing and its timeout handling. [`detect`] picks the one for the
//! host at startup.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ProbeError;

/// Default timeout for platform commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolver configuration read on POSIX hosts.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Queries the host's routing table and resolver configuration.
#[async_trait]
pub trait RoutingInfoProvider: Send + Sync {
    /// Next hop of the default route.
    async fn gateway(&self) -> Result<String, ProbeError>;

    /// Configured DNS resolvers in configuration order. May be empty.
    async fn dns_servers(&self) -> Result<Vec<String>, ProbeError>;
}

/// Pick the provider for the current platform.
pub fn detect(command_timeout: Duration) -> Arc<dyn RoutingInfoProvider> {
    if cfg!(windows) {
        Arc::new(WindowsRouting::new(command_timeout))
    } else {
        Arc::new(PosixRouting::new(command_timeout))
    }
}

/// `ip route` / `route -n get` plus `resolv.conf`.
#[derive(Debug, Clone)]
pub struct PosixRouting {
    route_command: Vec<String>,
    resolv_conf: PathBuf,
    command_timeout: Duration,
}

impl PosixRouting {
    pub fn new(command_timeout: Duration) -> Self {
        let route_command: &[&str] = if cfg!(target_os = "macos") {
            &["route", "-n", "get", "default"]
        } else {
            &["ip", "route", "show", "default"]
        };

        Self {
            route_command: route_command.iter().map(|s| s.to_string()).collect(),
            resolv_conf: PathBuf::from(DEFAULT_RESOLV_CONF),
            command_timeout,
        }
    }

    /// Read resolvers from a different file.
    pub fn resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolv_conf = path.into();
        self
    }

    /// Replace the routing-table query. The first element is the program.
    pub fn route_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route_command = command.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for PosixRouting {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl RoutingInfoProvider for PosixRouting {
    async fn gateway(&self) -> Result<String, ProbeError> {
        let output = run_command(self.route_command.as_slice(), self.command_timeout).await?;
        parse_ip_route(&output)
            .or_else(|| parse_route_get(&output))
            .ok_or_else(|| ProbeError::Unresolvable("no default route".to_string()))
    }

    async fn dns_servers(&self) -> Result<Vec<String>, ProbeError> {
        let contents = tokio::fs::read_to_string(&self.resolv_conf).await?;
        Ok(parse_resolv_conf(&contents))
    }
}

/// `route print` plus `ipconfig /all`.
#[derive(Debug, Clone)]
pub struct WindowsRouting {
    command_timeout: Duration,
}

impl WindowsRouting {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for WindowsRouting {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl RoutingInfoProvider for WindowsRouting {
    async fn gateway(&self) -> Result<String, ProbeError> {
        let output = run_command(&["route", "print", "0.0.0.0"], self.command_timeout).await?;
        parse_route_print(&output)
            .ok_or_else(|| ProbeError::Unresolvable("no default route".to_string()))
    }

    async fn dns_servers(&self) -> Result<Vec<String>, ProbeError> {
        let output = run_command(&["ipconfig", "/all"], self.command_timeout).await?;
        Ok(parse_ipconfig_dns(&output))
    }
}

/// Run a command to completion and return its stdout.
///
/// The child is killed when the timeout fires or the caller is cancelled.
pub(crate) async fn run_command<S: AsRef<str>>(
    command: &[S],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ProbeError::Command("empty command".to_string()))?;

    let child = Command::new(program.as_ref())
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProbeError::Command(format!("{}: {}", program.as_ref(), e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output()).await??;

    if !output.status.success() {
        return Err(ProbeError::Command(format!(
            "{} exited with {}",
            program.as_ref(),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `default via 192.168.1.1 dev eth0 proto dhcp metric 100`
pub fn parse_ip_route(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next()? != "default" {
            return None;
        }
        while let Some(token) = tokens.next() {
            if token == "via" {
                return tokens.next().and_then(valid_ip);
            }
        }
        None
    })
}

/// `    gateway: 192.168.1.1` from BSD `route -n get default`.
pub fn parse_route_get(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        if key.trim() == "gateway" {
            valid_ip(value.trim())
        } else {
            None
        }
    })
}

/// `nameserver` entries in order, comments ignored.
pub fn parse_resolv_conf(contents: &str) -> Vec<String> {
    let mut servers = Vec::new();
    for line in contents.lines() {
        let line = line.split(['#', ';']).next().unwrap_or_default();
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some("nameserver") {
            if let Some(server) = tokens.next() {
                push_unique(&mut servers, server.to_string());
            }
        }
    }
    servers
}

/// Gateway column of the `0.0.0.0 0.0.0.0` row in `route print` output.
pub fn parse_route_print(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["0.0.0.0", "0.0.0.0", gateway, ..] => valid_ip(gateway),
            _ => None,
        }
    })
}

/// Every `DNS Servers` block in `ipconfig /all` output, in interface order.
///
/// A block starts on the labelled line and continues over the following
/// lines that hold nothing but an address.
pub fn parse_ipconfig_dns(output: &str) -> Vec<String> {
    let mut servers = Vec::new();
    let mut in_block = false;

    for line in output.lines() {
        let trimmed = line.trim();

        if let Some((label, value)) = trimmed.split_once(" : ") {
            in_block = label.trim_end_matches([' ', '.']).trim() == "DNS Servers";
            if in_block {
                if let Some(server) = valid_ip(value.trim()) {
                    push_unique(&mut servers, server);
                }
            }
            continue;
        }

        if in_block {
            match valid_ip(trimmed) {
                Some(server) => push_unique(&mut servers, server),
                None => in_block = false,
            }
        }
    }

    servers
}

fn valid_ip(token: &str) -> Option<String> {
    // strip an IPv6 zone suffix before validating
    let addr = token.split('%').next().unwrap_or(token);
    addr.parse::<IpAddr>().ok().map(|_| token.to_string())
}

fn push_unique(servers: &mut Vec<String>, server: String) {
    if !servers.contains(&server) {
        servers.push(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_route_default_via() {
        let out = "default via 192.168.1.1 dev wlan0 proto dhcp src 192.168.1.20 metric 600\n";
        assert_eq!(parse_ip_route(out).as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn ip_route_without_default_is_none() {
        assert_eq!(parse_ip_route(""), None);
        assert_eq!(parse_ip_route("10.0.0.0/8 dev tun0 scope link\n"), None);
        assert_eq!(parse_ip_route("default dev wg0 scope link\n"), None);
        assert_eq!(parse_ip_route("default via not-an-ip dev eth0\n"), None);
    }

    #[test]
    fn bsd_route_get() {
        let out = "   route to: default\ndestination: default\n    gateway: 10.0.0.1\n  interface: en0\n";
        assert_eq!(parse_route_get(out).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn resolv_conf_nameservers_in_order() {
        let contents = "\
# Generated by NetworkManager
search lan
nameserver 192.168.1.1
nameserver 1.1.1.1 # fallback
; nameserver 9.9.9.9
nameserver 192.168.1.1
options edns0
";
        assert_eq!(parse_resolv_conf(contents), vec!["192.168.1.1", "1.1.1.1"]);
        assert!(parse_resolv_conf("search lan\n").is_empty());
    }

    #[test]
    fn route_print_active_default() {
        let out = "\
IPv4 Route Table
===========================================================================
Active Routes:
Network Destination        Netmask          Gateway       Interface  Metric
          0.0.0.0          0.0.0.0      192.168.0.1    192.168.0.42     25
===========================================================================
";
        assert_eq!(parse_route_print(out).as_deref(), Some("192.168.0.1"));
    }

    #[test]
    fn route_print_on_link_is_none() {
        let out = "          0.0.0.0          0.0.0.0         On-link    10.8.0.2     5\n";
        assert_eq!(parse_route_print(out), None);
    }

    #[test]
    fn ipconfig_dns_blocks() {
        let out = "\
Ethernet adapter Ethernet:

   Connection-specific DNS Suffix  . : lan
   Default Gateway . . . . . . . . . : 192.168.0.1
   DNS Servers . . . . . . . . . . . : 192.168.0.1
                                       8.8.8.8
   NetBIOS over Tcpip. . . . . . . . : Enabled

Wireless LAN adapter Wi-Fi:

   DNS Servers . . . . . . . . . . . : fe80::1%12
                                       8.8.8.8
   Primary WINS Server . . . . . . . : 10.0.0.9
";
        assert_eq!(
            parse_ipconfig_dns(out),
            vec!["192.168.0.1", "8.8.8.8", "fe80::1%12"]
        );
    }

    #[tokio::test]
    async fn missing_resolv_conf_is_an_error() {
        let routing = PosixRouting::default().resolv_conf("/nonexistent/netpulse/resolv.conf");
        assert!(matches!(
            routing.dns_servers().await,
            Err(ProbeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn resolv_conf_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        std::fs::write(&path, "nameserver 10.1.1.1\nnameserver 10.1.1.2\n").unwrap();

        let routing = PosixRouting::default().resolv_conf(&path);
        assert_eq!(routing.dns_servers().await.unwrap(), vec!["10.1.1.1", "10.1.1.2"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_route_output_is_unresolvable() {
        let routing = PosixRouting::default().route_command(["echo", "garbage"]);
        assert!(matches!(
            routing.gateway().await,
            Err(ProbeError::Unresolvable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_command_times_out() {
        let started = std::time::Instant::now();
        let result = run_command(&["sleep", "30"], Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ProbeError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_command_error() {
        let result = run_command(&["netpulse-no-such-command"], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::Command(_))));
    }
}
