//! Discovery sessions: the current endpoint set plus the strategies that
//! refresh and select from it.
//!
//! Every mutable piece of a session sits behind its own lock so that swapping
//! a strategy never waits on an in-flight selection and vice versa. Operations
//! copy the `Arc` of each strategy they need when they start and release the
//! lock before doing any I/O; a retriever or health checker swapped
//! mid-refresh only takes effect from the next refresh. The ranked set always
//! goes to the load balancer that is active when it is installed.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::{
    balancer::{LoadBalancer, Rfc2782Balancer},
    endpoint::record_name,
    error::ErrorLog,
    health::{DialHealthChecker, HealthChecker, DEFAULT_PROBE_TIMEOUT},
    rank::rank,
    retriever::{DnsRetriever, Retriever},
    DiscoveryError, Endpoint, Target,
};

/// Resolve `_<service>._<proto>.<name>`, probe every target and return the
/// preferred healthy one.
///
/// `proto` must be `tcp` or `udp`. `Ok(None)` means the lookup succeeded but no
/// target passed its health check.
pub async fn discover(
    service: &str,
    proto: &str,
    name: &str,
) -> Result<Option<Target>, DiscoveryError> {
    let discovery = Discovery::new(service, proto, name);
    discovery.refresh().await?;
    Ok(discovery.choose())
}

/// A long-lived lookup target with its current ranked endpoint set.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct Discovery {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    service: String,
    proto: String,
    name: String,
    retriever: RwLock<Arc<dyn Retriever>>,
    health_checker: RwLock<Arc<dyn HealthChecker>>,
    load_balancer: RwLock<Arc<dyn LoadBalancer>>,
    servers: RwLock<Arc<[Endpoint]>>,
    pub(crate) errors: ErrorLog,
}

fn snapshot<T: ?Sized>(lock: &RwLock<Arc<T>>) -> Arc<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace<T: ?Sized>(lock: &RwLock<Arc<T>>, value: Arc<T>) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl Discovery {
    /// Create a session with the default strategies: system DNS lookup, a
    /// connection-based health check and RFC 2782 selection.
    pub fn new(service: impl Into<String>, proto: impl Into<String>, name: impl Into<String>) -> Self {
        Self::builder(service, proto, name).build()
    }

    pub fn builder(
        service: impl Into<String>,
        proto: impl Into<String>,
        name: impl Into<String>,
    ) -> DiscoveryBuilder {
        DiscoveryBuilder::new(service.into(), proto.into(), name.into())
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn proto(&self) -> &str {
        &self.inner.proto
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The SRV owner name this session looks up.
    pub fn record_name(&self) -> String {
        record_name(&self.inner.service, &self.inner.proto, &self.inner.name)
    }

    /// Look up the candidates, probe each one and install the healthy ones in
    /// RFC 2782 order.
    ///
    /// A lookup failure is returned and leaves the installed set untouched.
    /// Probe failures only exclude their endpoint; they are recorded for
    /// [`Discovery::errors`]. Ending up with no healthy endpoint is not an error.
    pub async fn refresh(&self) -> Result<(), DiscoveryError> {
        let inner = &self.inner;
        let retriever = snapshot(&inner.retriever);
        let health_checker = snapshot(&inner.health_checker);
        debug!(record = %self.record_name(), "refreshing endpoints");

        let candidates = retriever.retrieve(&inner.service, &inner.proto, &inner.name).await?;
        let total = candidates.len();

        let probes = candidates
            .iter()
            .map(|ep| health_checker.health_check(&ep.host, ep.port, &inner.proto));
        let results = join_all(probes).await;

        let mut healthy = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (ep, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(true) => healthy.push(ep),
                Ok(false) => debug!(host = %ep.host, port = ep.port, "endpoint reported down"),
                Err(e) => {
                    warn!(host = %ep.host, port = ep.port, error = %e, "health check failed");
                    failures.push(e);
                }
            }
        }
        inner.errors.extend(failures);

        let ranked: Arc<[Endpoint]> = rank(healthy).into();
        let installed = ranked.len();
        {
            let mut servers = inner.servers.write().unwrap_or_else(PoisonError::into_inner);
            *servers = Arc::clone(&ranked);
            // Read under the write lock so a concurrent `set_load_balancer`
            // either seeds its balancer with this set or is the one updated here.
            snapshot(&inner.load_balancer).change_servers(ranked);
        }

        debug!(record = %self.record_name(), candidates = total, installed, "refreshed endpoints");
        Ok(())
    }

    /// The target the active load balancer picks from the installed set.
    ///
    /// Never performs I/O. `None` when no endpoint is selectable.
    pub fn choose(&self) -> Option<Target> {
        let _servers = self.inner.servers.read().unwrap_or_else(PoisonError::into_inner);
        snapshot(&self.inner.load_balancer).load_balance()
    }

    /// The currently installed ranked endpoint set.
    pub fn servers(&self) -> Arc<[Endpoint]> {
        snapshot(&self.inner.servers)
    }

    /// Take every error recorded since the last call.
    pub fn errors(&self) -> Vec<DiscoveryError> {
        self.inner.errors.drain()
    }

    pub fn set_retriever<R: Retriever + 'static>(&self, retriever: R) {
        debug!(record = %self.record_name(), "replacing retriever");
        replace(&self.inner.retriever, Arc::new(retriever));
    }

    pub fn set_health_checker<H: HealthChecker + 'static>(&self, health_checker: H) {
        debug!(record = %self.record_name(), "replacing health checker");
        replace(&self.inner.health_checker, Arc::new(health_checker));
    }

    /// Swap the load balancer. The new one starts out with the currently
    /// installed set.
    pub fn set_load_balancer<L: LoadBalancer + 'static>(&self, load_balancer: L) {
        debug!(record = %self.record_name(), "replacing load balancer");
        let servers = self.inner.servers.read().unwrap_or_else(PoisonError::into_inner);
        load_balancer.change_servers(servers.clone());
        replace(&self.inner.load_balancer, Arc::new(load_balancer));
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("service", &self.inner.service)
            .field("proto", &self.inner.proto)
            .field("name", &self.inner.name)
            .field("servers", &self.servers().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Discovery`] sessions with non-default strategies.
///
/// ```ignore
/// let discovery = Discovery::builder("ldap", "tcp", "example.com")
///     .probe_timeout(Duration::from_millis(500))
///     .load_balancer(LoadBalancerFn::new(|servers| servers.last().map(Endpoint::target)))
///     .build();
/// ```
pub struct DiscoveryBuilder {
    service: String,
    proto: String,
    name: String,
    retriever: Option<Arc<dyn Retriever>>,
    health_checker: Option<Arc<dyn HealthChecker>>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    probe_timeout: Duration,
}

impl DiscoveryBuilder {
    fn new(service: String, proto: String, name: String) -> Self {
        Self {
            service,
            proto,
            name,
            retriever: None,
            health_checker: None,
            load_balancer: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn retriever<R: Retriever + 'static>(mut self, retriever: R) -> Self {
        self.retriever = Some(Arc::new(retriever));
        self
    }

    #[must_use]
    pub fn health_checker<H: HealthChecker + 'static>(mut self, health_checker: H) -> Self {
        self.health_checker = Some(Arc::new(health_checker));
        self
    }

    #[must_use]
    pub fn load_balancer<L: LoadBalancer + 'static>(mut self, load_balancer: L) -> Self {
        self.load_balancer = Some(Arc::new(load_balancer));
        self
    }

    /// Connection timeout of the default health checker. Ignored when a
    /// custom health checker is set.
    #[must_use]
    pub const fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn build(self) -> Discovery {
        let retriever = self.retriever.unwrap_or_else(|| Arc::new(DnsRetriever::new()));
        let health_checker = self
            .health_checker
            .unwrap_or_else(|| Arc::new(DialHealthChecker::new(self.probe_timeout)));
        let load_balancer = self.load_balancer.unwrap_or_else(|| Arc::new(Rfc2782Balancer::new()));

        Discovery {
            inner: Arc::new(Inner {
                service: self.service,
                proto: self.proto,
                name: self.name,
                retriever: RwLock::new(retriever),
                health_checker: RwLock::new(health_checker),
                load_balancer: RwLock::new(load_balancer),
                servers: RwLock::new(Arc::from(Vec::new())),
                errors: ErrorLog::default(),
            }),
        }
    }
}

impl std::fmt::Debug for DiscoveryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryBuilder")
            .field("service", &self.service)
            .field("proto", &self.proto)
            .field("name", &self.name)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}
