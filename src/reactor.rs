//! Event-loop adapter.
//!
//! Generalizes the launch-a-listener-and-dispatch-work shape into a single
//! seam over a `tokio::runtime::Handle`, so the rest of the crate spawns
//! work through one type instead of reaching for `tokio::spawn` directly
//! everywhere. Either a callback-driven event loop or an async
//! task-per-connection model can sit behind this seam; this crate uses
//! tokio tasks.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Thin wrapper around the runtime handle connections and the server run
/// on. Cloning is cheap (it's a handle, not a runtime).
#[derive(Clone)]
pub struct Reactor {
    handle: Handle,
}

impl Reactor {
    /// Captures the handle of the runtime this is called from. Panics if
    /// called outside a tokio runtime context, matching `Handle::current`.
    pub fn current() -> Self {
        Reactor {
            handle: Handle::current(),
        }
    }

    /// Wraps an existing handle, for a host that manages its own runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Reactor { handle }
    }

    /// Spawns a future as an independent task on this reactor's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Resolves after `duration` has elapsed.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Resolves at or after `deadline`; returns immediately if it has
    /// already passed.
    pub async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline.into()).await;
    }

    /// Runs `future`, aborting and returning `None` if `timeout` elapses
    /// first.
    pub async fn with_timeout<F>(&self, timeout: Duration, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::time::timeout(timeout, future).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_runs_the_future() {
        let reactor = Reactor::current();
        let handle = reactor.spawn(async { 1 + 1 });
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn with_timeout_returns_none_on_expiry() {
        let reactor = Reactor::current();
        let result = reactor
            .with_timeout(Duration::from_millis(5), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn with_timeout_returns_some_on_completion() {
        let reactor = Reactor::current();
        let result = reactor.with_timeout(Duration::from_secs(5), async { 7 }).await;
        assert_eq!(result, Some(7));
    }
}
