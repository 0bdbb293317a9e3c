//! Periodic background refresh of a [`Discovery`] session.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Discovery;

/// Handle to a background refresh loop started by [`Discovery::refresh_async`].
///
/// Dropping the handle does not stop the loop; call [`RefreshHandle::stop`] or
/// [`RefreshHandle::stop_and_wait`].
#[derive(Debug)]
pub struct RefreshHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Ask the loop to exit. A refresh already running is allowed to finish;
    /// no refresh starts after the signal is seen.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`RefreshHandle::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for the background task to exit.
    pub async fn stop_and_wait(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "refresh task panicked");
        }
    }
}

impl Discovery {
    /// Refresh now and then every `interval` on a background task until the
    /// returned handle is stopped.
    ///
    /// Errors from these refreshes cannot be returned to anyone, so they are
    /// recorded for [`Discovery::errors`]. Must be called within a tokio runtime.
    pub fn refresh_async(&self, interval: Duration) -> RefreshHandle {
        let cancel = CancellationToken::new();
        let discovery = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { discovery.refresh_loop(interval, token).await });
        RefreshHandle { cancel, task }
    }

    async fn refresh_loop(self, interval: Duration, cancel: CancellationToken) {
        // tokio intervals reject a zero period.
        let period = interval.max(Duration::from_millis(1));
        let record = self.record_name();
        info!(record = %record, interval_ms = period.as_millis(), "starting background refresh");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if let Err(e) = self.refresh().await {
                warn!(record = %record, error = %e, "background refresh failed");
                self.inner.errors.push(e);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!(record = %record, "background refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{DiscoveryError, Endpoint, HealthCheckerFn, RetrieverFn};

    fn counting_discovery(calls: Arc<AtomicUsize>) -> Discovery {
        Discovery::builder("http", "tcp", "example.com")
            .retriever(RetrieverFn::new(move |_, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![Endpoint::new("a", 80, 0, 0)]) }
            }))
            .health_checker(HealthCheckerFn::new(|_, _, _| async { Ok(true) }))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_immediately_then_every_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let discovery = counting_discovery(Arc::clone(&calls));

        let handle = discovery.refresh_async(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(discovery.choose().is_some());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let discovery = counting_discovery(Arc::clone(&calls));

        let handle = discovery.refresh_async(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handle.stop();
        assert!(handle.is_stopped());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn background_errors_are_logged() {
        let discovery = Discovery::builder("http", "tcp", "example.com")
            .retriever(RetrieverFn::new(|_, _, _| async {
                Err(DiscoveryError::lookup("_http._tcp.example.com", "NXDOMAIN"))
            }))
            .build();

        let handle = discovery.refresh_async(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop_and_wait().await;

        let errors = discovery.errors();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| matches!(e, DiscoveryError::Lookup { .. })));
        assert!(discovery.errors().is_empty());
    }
}
