//! Outbound local address discovery.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::ProbeError;

/// Well-known external address used to select the outbound route.
pub const DEFAULT_ROUTE_PROBE: &str = "8.8.8.8:80";

#[async_trait]
pub trait LocalIpLookup: Send + Sync {
    async fn local_ip(&self) -> Result<String, ProbeError>;
}

/// Reads the source address the kernel picks for a route to a remote host.
///
/// A UDP `connect` sends nothing on the wire; it only binds the socket to
/// the outbound interface. When that fails (no route, sandboxed host) the
/// host name is resolved instead.
#[derive(Debug, Clone)]
pub struct RouteLocalIp {
    probe_addr: String,
}

impl RouteLocalIp {
    pub fn new(probe_addr: impl Into<String>) -> Self {
        Self {
            probe_addr: probe_addr.into(),
        }
    }

    async fn via_route(&self) -> Result<IpAddr, ProbeError> {
        let bind: SocketAddr = if self.probe_addr.starts_with('[') {
            "[::]:0".parse().map_err(|e| ProbeError::Parse(format!("{e}")))?
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(&self.probe_addr).await?;
        let ip = socket.local_addr()?.ip();

        if ip.is_unspecified() {
            return Err(ProbeError::Unresolvable("no outbound route".to_string()));
        }
        Ok(ip)
    }
}

impl Default for RouteLocalIp {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_PROBE)
    }
}

#[async_trait]
impl LocalIpLookup for RouteLocalIp {
    async fn local_ip(&self) -> Result<String, ProbeError> {
        match self.via_route().await {
            Ok(ip) => Ok(ip.to_string()),
            Err(e) => {
                tracing::debug!(error = %e, "route lookup failed, falling back to host name");
                via_host_name().await.map(|ip| ip.to_string())
            }
        }
    }
}

async fn via_host_name() -> Result<IpAddr, ProbeError> {
    let host = sysinfo::System::host_name()
        .ok_or_else(|| ProbeError::Unresolvable("host name unavailable".to_string()))?;

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .map(|addr| addr.ip())
        .collect();

    pick_address(&addrs)
        .ok_or_else(|| ProbeError::Unresolvable(format!("{host} has no addresses")))
}

/// Prefer a non-loopback IPv4 address, then any non-loopback, then anything.
fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .or_else(|| addrs.iter().find(|ip| !ip.is_loopback()))
        .or_else(|| addrs.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn prefers_routable_ipv4() {
        let addrs = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        ];
        assert_eq!(pick_address(&addrs), Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
    }

    #[test]
    fn loopback_only_still_answers() {
        let addrs = [IpAddr::V4(Ipv4Addr::new(127, 0, 1, 1))];
        assert_eq!(pick_address(&addrs), Some(addrs[0]));
        assert_eq!(pick_address(&[]), None);
    }

    #[tokio::test]
    async fn loopback_route_resolves_to_loopback() {
        let lookup = RouteLocalIp::new("127.0.0.1:9");
        assert_eq!(lookup.local_ip().await.unwrap(), "127.0.0.1");
    }
}
