//! Directory lookup: service name to candidate endpoints.

use std::future::Future;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{endpoint::record_name, DiscoveryError, Endpoint, Network};

/// Resolves a `(service, proto, name)` triple to candidate endpoints.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Look up the SRV records of `_<service>._<proto>.<name>`.
    async fn retrieve(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError>;
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for std::sync::Arc<T> {
    async fn retrieve(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        (**self).retrieve(service, proto, name).await
    }
}

/// Adapts an async function into a [`Retriever`].
///
/// ```ignore
/// let retriever = RetrieverFn::new(|_service, _proto, _name| async {
///     Ok(vec![Endpoint::new("db1.example.com", 5432, 10, 1)])
/// });
/// ```
pub struct RetrieverFn<F>(F);

impl<F, Fut> RetrieverFn<F>
where
    F: Fn(String, String, String) -> Fut,
    Fut: Future<Output = Result<Vec<Endpoint>, DiscoveryError>>,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> std::fmt::Debug for RetrieverFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieverFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Retriever for RetrieverFn<F>
where
    F: Fn(String, String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Endpoint>, DiscoveryError>> + Send + 'static,
{
    async fn retrieve(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        (self.0)(service.to_string(), proto.to_string(), name.to_string()).await
    }
}

/// Default retriever: SRV lookup through the system resolver configuration.
///
/// The resolver is built on first use, so constructing a `DnsRetriever` never
/// fails even on hosts without a usable resolver configuration.
#[derive(Default)]
pub struct DnsRetriever {
    resolver: OnceCell<TokioAsyncResolver>,
}

impl DnsRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an already configured resolver instead of the system one.
    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver: OnceCell::new_with(Some(resolver)) }
    }
}

impl std::fmt::Debug for DnsRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsRetriever")
            .field("initialized", &self.resolver.initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Retriever for DnsRetriever {
    async fn retrieve(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        proto.parse::<Network>()?;
        let record = record_name(service, proto, name);

        let resolver = self
            .resolver
            .get_or_try_init(|| async { TokioAsyncResolver::tokio_from_system_conf() })
            .await
            .map_err(|e| DiscoveryError::lookup(record.as_str(), e))?;

        let lookup = resolver
            .srv_lookup(record.as_str())
            .await
            .map_err(|e| DiscoveryError::lookup(record.as_str(), e))?;

        let endpoints: Vec<Endpoint> = lookup
            .iter()
            .map(|srv| {
                Endpoint::new(srv.target().to_utf8(), srv.port(), srv.priority(), srv.weight())
            })
            .collect();

        debug!(record = %record, count = endpoints.len(), "retrieved SRV records");
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_adapter_receives_lookup_target() {
        let retriever = RetrieverFn::new(|service, proto, name| async move {
            Ok(vec![Endpoint::new(format!("{service}.{proto}.{name}"), 1, 0, 0)])
        });

        let got = retriever.retrieve("ldap", "tcp", "example.com").await.unwrap();
        assert_eq!(got, vec![Endpoint::new("ldap.tcp.example.com", 1, 0, 0)]);
    }

    #[tokio::test]
    async fn fn_adapter_passes_errors_through() {
        let retriever = RetrieverFn::new(|_, _, _| async {
            Err(DiscoveryError::lookup("_x._tcp.example.com", "SERVFAIL"))
        });

        let err = retriever.retrieve("x", "tcp", "example.com").await.unwrap_err();
        assert_eq!(err.to_string(), "lookup _x._tcp.example.com failed: SERVFAIL");
    }

    #[tokio::test]
    async fn dns_rejects_unknown_network_before_lookup() {
        let retriever = DnsRetriever::new();
        let err = retriever.retrieve("ldap", "sctp", "example.com").await.unwrap_err();

        assert!(err.is_unknown_network());
        // No resolver was built, so no query can have been sent.
        assert!(!retriever.resolver.initialized());
    }
}
