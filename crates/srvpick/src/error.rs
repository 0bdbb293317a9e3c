//! Error taxonomy and the error log drained by callers of background refreshes.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Boxed error produced by a pluggable strategy.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while discovering and probing endpoints.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The transport protocol is neither `tcp` nor `udp`.
    UnknownNetwork(String),
    /// The directory lookup for `record` failed.
    Lookup { record: String, source: BoxError },
    /// Probing `host:port` failed.
    Probe { host: String, port: u16, source: BoxError },
    /// Probing `host:port` did not finish within `timeout`.
    Timeout { host: String, port: u16, timeout: Duration },
}

impl DiscoveryError {
    /// Wrap a lookup failure for the given record name.
    pub fn lookup(record: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Lookup { record: record.into(), source: source.into() }
    }

    /// Wrap a probe failure for `host:port`.
    pub fn probe(host: impl Into<String>, port: u16, source: impl Into<BoxError>) -> Self {
        Self::Probe { host: host.into(), port, source: source.into() }
    }

    pub fn is_unknown_network(&self) -> bool {
        matches!(self, Self::UnknownNetwork(_))
    }

    /// True for errors raised by a liveness probe.
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Probe { .. } | Self::Timeout { .. })
    }
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNetwork(net) => write!(f, "unknown network {}", net),
            Self::Lookup { record, source } => write!(f, "lookup {} failed: {}", record, source),
            Self::Probe { host, port, source } => {
                write!(f, "health check {}:{} failed: {}", host, port, source)
            }
            Self::Timeout { host, port, timeout } => {
                write!(f, "health check {}:{} timed out after {:?}", host, port, timeout)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lookup { source, .. } | Self::Probe { source, .. } => Some(source.as_ref()),
            Self::UnknownNetwork(_) | Self::Timeout { .. } => None,
        }
    }
}

/// Append-only log of errors from background work, drained by the caller.
#[derive(Debug, Default)]
pub(crate) struct ErrorLog {
    errors: Mutex<Vec<DiscoveryError>>,
}

impl ErrorLog {
    pub(crate) fn push(&self, err: DiscoveryError) {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
    }

    pub(crate) fn extend(&self, errs: impl IntoIterator<Item = DiscoveryError>) {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).extend(errs);
    }

    /// Return every logged error and leave the log empty.
    pub(crate) fn drain(&self) -> Vec<DiscoveryError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
