//! Network info resolver.
//!
//! Resolves the four slow-changing facts of [`NetworkInfo`] independently.
//! A failure in one lookup is logged and leaves that field `None`; it never
//! touches the others or aborts the pass.
//!
//! # Example
//!
//! ```rust,no_run
//! use netpulse_probes::NetworkInfoResolver;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let resolver = NetworkInfoResolver::builder()
//!     .public_ip_url("https://api.ipify.org?format=json")
//!     .command_timeout(Duration::from_secs(3))
//!     .build();
//!
//! let info = resolver.resolve().await;
//! println!("gateway: {}", info.gateway_or_unknown());
//! # }
//! ```

mod local_ip;
mod public_ip;
mod routing;

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use netpulse_types::NetworkInfo;

use crate::error::ProbeError;

pub use local_ip::{LocalIpLookup, RouteLocalIp, DEFAULT_ROUTE_PROBE};
pub use public_ip::{
    parse_ip_echo, HttpPublicIp, PublicIpLookup, DEFAULT_PUBLIC_IP_TIMEOUT, DEFAULT_PUBLIC_IP_URL,
};
pub use routing::{
    detect as detect_routing, parse_ip_route, parse_ipconfig_dns, parse_resolv_conf,
    parse_route_get, parse_route_print, PosixRouting, RoutingInfoProvider, WindowsRouting,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_RESOLV_CONF,
};

/// Resolves [`NetworkInfo`] from its four sources.
#[derive(Clone)]
pub struct NetworkInfoResolver {
    local: Arc<dyn LocalIpLookup>,
    public: Arc<dyn PublicIpLookup>,
    routing: Arc<dyn RoutingInfoProvider>,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for NetworkInfoResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkInfoResolver")
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl NetworkInfoResolver {
    /// Resolver with platform defaults.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> NetworkInfoResolverBuilder {
        NetworkInfoResolverBuilder::default()
    }

    /// Run all four lookups concurrently and assemble the result.
    pub async fn resolve(&self) -> NetworkInfo {
        let (local_ip, public_ip, gateway, dns_servers) = tokio::join!(
            self.resolve_local_ip(),
            self.resolve_public_ip(),
            self.resolve_gateway(),
            self.resolve_dns_servers(),
        );

        NetworkInfo {
            local_ip,
            public_ip,
            gateway,
            dns_servers,
        }
    }

    pub async fn resolve_local_ip(&self) -> Option<String> {
        self.contained("local_ip", self.local.local_ip()).await
    }

    pub async fn resolve_public_ip(&self) -> Option<String> {
        self.contained("public_ip", self.public.public_ip()).await
    }

    pub async fn resolve_gateway(&self) -> Option<String> {
        self.contained("gateway", self.routing.gateway()).await
    }

    /// Empty when the resolver configuration cannot be read.
    pub async fn resolve_dns_servers(&self) -> Vec<String> {
        self.contained("dns_servers", self.routing.dns_servers())
            .await
            .unwrap_or_default()
    }

    /// Bound a lookup by the resolver timeout and fold any failure into `None`.
    async fn contained<T, F>(&self, field: &'static str, lookup: F) -> Option<T>
    where
        F: Future<Output = Result<T, ProbeError>>,
        T: Debug,
    {
        let result = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        match result {
            Ok(value) => {
                tracing::debug!(field, ?value, "resolved");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(field, error = %e, "lookup failed");
                None
            }
        }
    }
}

impl Default for NetworkInfoResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`NetworkInfoResolver`].
#[derive(Default)]
pub struct NetworkInfoResolverBuilder {
    local: Option<Arc<dyn LocalIpLookup>>,
    public: Option<Arc<dyn PublicIpLookup>>,
    routing: Option<Arc<dyn RoutingInfoProvider>>,
    public_ip_url: Option<String>,
    public_ip_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    lookup_timeout: Option<Duration>,
}

impl NetworkInfoResolverBuilder {
    /// IP-echo endpoint for the default public IP lookup.
    pub fn public_ip_url(mut self, url: impl Into<String>) -> Self {
        self.public_ip_url = Some(url.into());
        self
    }

    pub fn public_ip_timeout(mut self, timeout: Duration) -> Self {
        self.public_ip_timeout = Some(timeout);
        self
    }

    /// Timeout for the platform routing and DNS commands.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Upper bound for any single lookup, whatever its own timeouts.
    ///
    /// Defaults to the longer of the public IP and command timeouts plus one
    /// second.
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn local_ip_lookup(mut self, lookup: impl LocalIpLookup + 'static) -> Self {
        self.local = Some(Arc::new(lookup));
        self
    }

    pub fn public_ip_lookup(mut self, lookup: impl PublicIpLookup + 'static) -> Self {
        self.public = Some(Arc::new(lookup));
        self
    }

    pub fn routing(mut self, provider: impl RoutingInfoProvider + 'static) -> Self {
        self.routing = Some(Arc::new(provider));
        self
    }

    pub fn build(self) -> NetworkInfoResolver {
        let public_ip_timeout = self.public_ip_timeout.unwrap_or(DEFAULT_PUBLIC_IP_TIMEOUT);
        let command_timeout = self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let lookup_timeout = self
            .lookup_timeout
            .unwrap_or_else(|| public_ip_timeout.max(command_timeout) + Duration::from_secs(1));

        let public = self.public.unwrap_or_else(|| {
            let url = self
                .public_ip_url
                .unwrap_or_else(|| DEFAULT_PUBLIC_IP_URL.to_string());
            Arc::new(HttpPublicIp::new(url, public_ip_timeout))
        });

        NetworkInfoResolver {
            local: self.local.unwrap_or_else(|| Arc::new(RouteLocalIp::default())),
            public,
            routing: self.routing.unwrap_or_else(|| routing::detect(command_timeout)),
            lookup_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedLocal(Result<&'static str, ()>);

    #[async_trait]
    impl LocalIpLookup for FixedLocal {
        async fn local_ip(&self) -> Result<String, ProbeError> {
            self.0
                .map(String::from)
                .map_err(|_| ProbeError::Unresolvable("no route".into()))
        }
    }

    struct FixedPublic(Result<&'static str, ()>);

    #[async_trait]
    impl PublicIpLookup for FixedPublic {
        async fn public_ip(&self) -> Result<String, ProbeError> {
            self.0
                .map(String::from)
                .map_err(|_| ProbeError::Http("connection reset".into()))
        }
    }

    struct FixedRouting {
        gateway: Result<&'static str, ()>,
        dns: Result<Vec<&'static str>, ()>,
    }

    #[async_trait]
    impl RoutingInfoProvider for FixedRouting {
        async fn gateway(&self) -> Result<String, ProbeError> {
            self.gateway
                .map(String::from)
                .map_err(|_| ProbeError::Unresolvable("malformed output".into()))
        }

        async fn dns_servers(&self) -> Result<Vec<String>, ProbeError> {
            self.dns
                .clone()
                .map(|servers| servers.into_iter().map(String::from).collect())
                .map_err(|_| ProbeError::Io(std::io::ErrorKind::NotFound.into()))
        }
    }

    struct HangingPublic;

    #[async_trait]
    impl PublicIpLookup for HangingPublic {
        async fn public_ip(&self) -> Result<String, ProbeError> {
            std::future::pending().await
        }
    }

    fn healthy_routing() -> FixedRouting {
        FixedRouting {
            gateway: Ok("192.168.1.1"),
            dns: Ok(vec!["192.168.1.1", "1.1.1.1"]),
        }
    }

    fn resolver(
        local: Result<&'static str, ()>,
        public: Result<&'static str, ()>,
        routing: FixedRouting,
    ) -> NetworkInfoResolver {
        NetworkInfoResolver::builder()
            .local_ip_lookup(FixedLocal(local))
            .public_ip_lookup(FixedPublic(public))
            .routing(routing)
            .build()
    }

    #[tokio::test]
    async fn all_lookups_succeed() {
        let info = resolver(Ok("192.168.1.20"), Ok("203.0.113.9"), healthy_routing())
            .resolve()
            .await;

        assert_eq!(info.local_ip.as_deref(), Some("192.168.1.20"));
        assert_eq!(info.public_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(info.dns_servers, vec!["192.168.1.1", "1.1.1.1"]);
    }

    #[tokio::test]
    async fn http_failure_only_loses_public_ip() {
        let info = resolver(Ok("10.0.0.2"), Err(()), healthy_routing())
            .resolve()
            .await;

        assert_eq!(info.public_ip_or_unknown(), "Unknown");
        assert_eq!(info.local_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(info.gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(info.dns_servers.len(), 2);
    }

    #[tokio::test]
    async fn missing_config_file_only_loses_dns() {
        let routing = FixedRouting {
            gateway: Ok("192.168.1.1"),
            dns: Err(()),
        };
        let info = resolver(Ok("10.0.0.2"), Ok("203.0.113.9"), routing)
            .resolve()
            .await;

        assert_eq!(info.dns_display(), "N/A");
        assert!(info.local_ip.is_some());
        assert!(info.public_ip.is_some());
        assert!(info.gateway.is_some());
    }

    #[tokio::test]
    async fn malformed_route_output_only_loses_gateway() {
        let routing = FixedRouting {
            gateway: Err(()),
            dns: Ok(vec!["9.9.9.9"]),
        };
        let info = resolver(Ok("10.0.0.2"), Ok("203.0.113.9"), routing)
            .resolve()
            .await;

        assert_eq!(info.gateway_or_unknown(), "Unknown");
        assert_eq!(info.dns_servers, vec!["9.9.9.9"]);
        assert!(info.local_ip.is_some());
        assert!(info.public_ip.is_some());
    }

    #[tokio::test]
    async fn local_failure_only_loses_local_ip() {
        let info = resolver(Err(()), Ok("203.0.113.9"), healthy_routing())
            .resolve()
            .await;

        assert!(info.local_ip.is_none());
        assert!(info.public_ip.is_some());
        assert!(info.gateway.is_some());
        assert!(!info.dns_servers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_lookup_is_bounded() {
        let resolver = NetworkInfoResolver::builder()
            .local_ip_lookup(FixedLocal(Ok("10.0.0.2")))
            .public_ip_lookup(HangingPublic)
            .routing(healthy_routing())
            .lookup_timeout(Duration::from_secs(2))
            .build();

        let info = resolver.resolve().await;
        assert!(info.public_ip.is_none());
        assert_eq!(info.local_ip.as_deref(), Some("10.0.0.2"));
    }
}
