//! Target selection over the installed endpoint set.

use std::sync::{Arc, PoisonError, RwLock};

use crate::{Endpoint, Target};

/// Picks the endpoint to use from the most recently installed set.
///
/// Both methods are called from synchronous context and must not block on I/O.
pub trait LoadBalancer: Send + Sync {
    /// Called after every successful refresh with the new ranked set.
    fn change_servers(&self, servers: Arc<[Endpoint]>);

    /// Choose a target, or `None` when nothing is selectable.
    fn load_balance(&self) -> Option<Target>;
}

impl<T: LoadBalancer + ?Sized> LoadBalancer for Arc<T> {
    fn change_servers(&self, servers: Arc<[Endpoint]>) {
        (**self).change_servers(servers)
    }

    fn load_balance(&self) -> Option<Target> {
        (**self).load_balance()
    }
}

/// Default load balancer: the head of the ranked set.
///
/// The ranked set is already in RFC 2782 preference order, with the weighted
/// draw done at refresh time, so the first entry is the pick.
#[derive(Debug)]
pub struct Rfc2782Balancer {
    servers: RwLock<Arc<[Endpoint]>>,
}

impl Rfc2782Balancer {
    pub fn new() -> Self {
        Self { servers: RwLock::new(Arc::from(Vec::new())) }
    }
}

impl Default for Rfc2782Balancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for Rfc2782Balancer {
    fn change_servers(&self, servers: Arc<[Endpoint]>) {
        *self.servers.write().unwrap_or_else(PoisonError::into_inner) = servers;
    }

    fn load_balance(&self) -> Option<Target> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).first().map(Endpoint::target)
    }
}

/// Adapts a plain selection function into a [`LoadBalancer`].
///
/// The adapter keeps the installed set and hands it to the function on every
/// `load_balance` call.
pub struct LoadBalancerFn<F> {
    select: F,
    servers: RwLock<Arc<[Endpoint]>>,
}

impl<F> LoadBalancerFn<F>
where
    F: Fn(&[Endpoint]) -> Option<Target>,
{
    pub fn new(select: F) -> Self {
        Self { select, servers: RwLock::new(Arc::from(Vec::new())) }
    }
}

impl<F> std::fmt::Debug for LoadBalancerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancerFn").finish_non_exhaustive()
    }
}

impl<F> LoadBalancer for LoadBalancerFn<F>
where
    F: Fn(&[Endpoint]) -> Option<Target> + Send + Sync,
{
    fn change_servers(&self, servers: Arc<[Endpoint]>) {
        *self.servers.write().unwrap_or_else(PoisonError::into_inner) = servers;
    }

    fn load_balance(&self) -> Option<Target> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner).clone();
        (self.select)(&servers)
    }
}
