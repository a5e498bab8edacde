//! Public address lookup through an HTTP IP-echo service.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ProbeError;

pub const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";
pub const DEFAULT_PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PublicIpLookup: Send + Sync {
    async fn public_ip(&self) -> Result<String, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

/// `GET` against an endpoint answering `{"ip": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpPublicIp {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpPublicIp {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Share an existing client (and its connection pool).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for HttpPublicIp {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_IP_URL, DEFAULT_PUBLIC_IP_TIMEOUT)
    }
}

#[async_trait]
impl PublicIpLookup for HttpPublicIp {
    async fn public_ip(&self) -> Result<String, ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProbeError::Http(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_ip_echo(&body)
    }
}

/// Parse and validate an IP-echo body.
pub fn parse_ip_echo(body: &str) -> Result<String, ProbeError> {
    let echo: IpEcho =
        serde_json::from_str(body).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let ip = echo.ip.trim();
    ip.parse::<IpAddr>()
        .map_err(|_| ProbeError::Parse(format!("not an address: {ip:?}")))?;
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });

        format!("http://{addr}/")
    }

    #[test]
    fn parses_echo_body() {
        assert_eq!(parse_ip_echo(r#"{"ip":"203.0.113.7"}"#).unwrap(), "203.0.113.7");
        assert_eq!(parse_ip_echo(r#"{"ip":"2001:db8::2"}"#).unwrap(), "2001:db8::2");
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        for body in ["", "<html>", r#"{"addr":"1.2.3.4"}"#, r#"{"ip":"localhost"}"#] {
            assert!(matches!(parse_ip_echo(body), Err(ProbeError::Parse(_))), "{body}");
        }
    }

    #[tokio::test]
    async fn fetches_from_endpoint() {
        let url = serve_once("200 OK", r#"{"ip":"198.51.100.4"}"#).await;
        let lookup = HttpPublicIp::new(url, Duration::from_secs(5));
        assert_eq!(lookup.public_ip().await.unwrap(), "198.51.100.4");
    }

    #[tokio::test]
    async fn error_status_is_http_error() {
        let url = serve_once("503 Service Unavailable", "{}").await;
        let lookup = HttpPublicIp::new(url, Duration::from_secs(5));
        assert!(matches!(lookup.public_ip().await, Err(ProbeError::Http(_))));
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        // bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let lookup = HttpPublicIp::new(format!("http://{addr}/"), Duration::from_secs(2));
        assert!(lookup.public_ip().await.is_err());
    }
}
