//! Slow-changing network facts.

use alloc::string::String;
use alloc::vec::Vec;

/// Rendering used for a fact that has not been resolved.
pub const UNKNOWN: &str = "Unknown";

/// Rendering used for an empty DNS server list.
pub const NOT_AVAILABLE: &str = "N/A";

/// Addressing facts about the host.
///
/// Each field resolves independently; `None` means the last lookup for that
/// field failed (or none has run yet). The whole value is replaced on every
/// refresh, fields are never merged with an older value: a field whose
/// lookup fails reads as unknown until a later refresh succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct NetworkInfo {
    /// Address the host uses for outbound traffic.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub local_ip: Option<String>,

    /// Address seen by an external IP-echo service.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub public_ip: Option<String>,

    /// Next hop of the default route.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub gateway: Option<String>,

    /// Configured DNS resolvers, in configuration order.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(3))]
    pub dns_servers: Vec<String>,
}

impl NetworkInfo {
    /// Info with every field unresolved.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// True if no field has been resolved.
    pub fn is_unknown(&self) -> bool {
        self.local_ip.is_none()
            && self.public_ip.is_none()
            && self.gateway.is_none()
            && self.dns_servers.is_empty()
    }

    pub fn local_ip_or_unknown(&self) -> &str {
        self.local_ip.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn public_ip_or_unknown(&self) -> &str {
        self.public_ip.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn gateway_or_unknown(&self) -> &str {
        self.gateway.as_deref().unwrap_or(UNKNOWN)
    }

    /// Comma-separated DNS servers, or `N/A` when none are configured.
    pub fn dns_display(&self) -> String {
        if self.dns_servers.is_empty() {
            String::from(NOT_AVAILABLE)
        } else {
            self.dns_servers.join(", ")
        }
    }
}
