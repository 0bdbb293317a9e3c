//! Endpoint records and transport protocols.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DiscoveryError;

/// One directory entry for a service: where it lives and how much it should
/// be preferred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Target host name or address.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Lower values are tried first.
    pub priority: u16,
    /// Relative share of traffic among endpoints of equal priority.
    pub weight: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self { host: host.into(), port, priority, weight }
    }

    /// The `host:port` pair of this endpoint.
    pub fn target(&self) -> Target {
        Target { host: self.host.clone(), port: self.port }
    }
}

/// A selected `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport protocols understood by the default retriever and health checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Stream transport.
    Tcp,
    /// Datagram transport.
    Udp,
}

impl Network {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(DiscoveryError::UnknownNetwork(s.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner name of the SRV records for a service: `_<service>._<proto>.<name>`.
pub fn record_name(service: &str, proto: &str, name: &str) -> String {
    format!("_{service}._{proto}.{name}")
}
