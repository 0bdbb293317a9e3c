//! Liveness probing of candidate endpoints.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use crate::{DiscoveryError, Network};

/// Default bound on a single connection attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Decides whether a single endpoint can currently take traffic.
///
/// `Ok(false)` excludes the endpoint quietly. `Err(_)` also excludes it, and
/// the error is recorded in the session's error log.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn health_check(
        &self,
        host: &str,
        port: u16,
        proto: &str,
    ) -> Result<bool, DiscoveryError>;
}

#[async_trait]
impl<T: HealthChecker + ?Sized> HealthChecker for std::sync::Arc<T> {
    async fn health_check(
        &self,
        host: &str,
        port: u16,
        proto: &str,
    ) -> Result<bool, DiscoveryError> {
        (**self).health_check(host, port, proto).await
    }
}

/// Adapts an async function into a [`HealthChecker`].
pub struct HealthCheckerFn<F>(F);

impl<F, Fut> HealthCheckerFn<F>
where
    F: Fn(String, u16, String) -> Fut,
    Fut: Future<Output = Result<bool, DiscoveryError>>,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> std::fmt::Debug for HealthCheckerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> HealthChecker for HealthCheckerFn<F>
where
    F: Fn(String, u16, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, DiscoveryError>> + Send + 'static,
{
    async fn health_check(
        &self,
        host: &str,
        port: u16,
        proto: &str,
    ) -> Result<bool, DiscoveryError> {
        (self.0)(host.to_string(), port, proto.to_string()).await
    }
}

/// Default health checker: an endpoint is alive if a transport-level
/// connection to it can be set up within the timeout.
///
/// For `udp` this binds an ephemeral socket and connects it to the target,
/// which validates the address and route without sending a datagram.
#[derive(Debug, Clone, Copy)]
pub struct DialHealthChecker {
    timeout: Duration,
}

impl DialHealthChecker {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for DialHealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl HealthChecker for DialHealthChecker {
    async fn health_check(
        &self,
        host: &str,
        port: u16,
        proto: &str,
    ) -> Result<bool, DiscoveryError> {
        let network: Network = proto.parse()?;

        match tokio::time::timeout(self.timeout, dial(network, host, port)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(DiscoveryError::probe(host, port, e)),
            Err(_) => Err(DiscoveryError::Timeout {
                host: host.to_string(),
                port,
                timeout: self.timeout,
            }),
        }
    }
}

async fn dial(network: Network, host: &str, port: u16) -> io::Result<()> {
    match network {
        Network::Tcp => TcpStream::connect((host, port)).await.map(drop),
        Network::Udp => {
            let addr = lookup_host((host, port)).await?.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))
            })?;
            let local: SocketAddr = match addr {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(addr).await
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_listener_is_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let checker = DialHealthChecker::default();
        assert!(checker.health_check("127.0.0.1", port, "tcp").await.unwrap());
    }

    #[tokio::test]
    async fn closed_tcp_port_is_probe_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = DialHealthChecker::new(Duration::from_secs(1));
        let err = checker.health_check("127.0.0.1", port, "tcp").await.unwrap_err();
        assert!(err.is_probe(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn udp_connect_succeeds() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let checker = DialHealthChecker::default();
        assert!(checker.health_check("127.0.0.1", port, "udp").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_network_rejected() {
        let checker = DialHealthChecker::default();
        let err = checker.health_check("127.0.0.1", 1, "quic").await.unwrap_err();
        assert!(err.is_unknown_network());
    }

    #[tokio::test]
    async fn fn_adapter() {
        let checker =
            HealthCheckerFn::new(|host, port, _proto| async move { Ok(host == "up" && port == 80) });

        assert!(checker.health_check("up", 80, "tcp").await.unwrap());
        assert!(!checker.health_check("down", 80, "tcp").await.unwrap());
    }

    #[test]
    fn default_timeout() {
        assert_eq!(DialHealthChecker::default().timeout(), DEFAULT_PROBE_TIMEOUT);
    }
}
