//! Error-observation collaborator.
//!
//! The original C implementation kept a process-wide error-stats struct
//! behind `uvhttp_get_error_stats`. This crate replaces that with an
//! explicit trait a host application installs on the server, so error
//! accounting lives wherever the host wants it instead of in crate-global
//! state.

use crate::error::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives notification of every error the server observes, after
/// sanitization. Implementors must be `Send + Sync`: connections across
/// multiple tokio worker threads report through the same observer.
pub trait ErrorObserver: Send + Sync {
    /// Called once per error, from whichever task/thread produced it.
    fn on_error(&self, kind: ErrorKind, sanitized_message: &str);
}

/// Default observer: forwards every error to the `log` facade at a level
/// derived from the error's recoverability, and keeps no state of its own.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ErrorObserver for LoggingObserver {
    fn on_error(&self, kind: ErrorKind, sanitized_message: &str) {
        if kind.is_recoverable() {
            log::debug!("[{}] {}: {}", kind.category(), kind, sanitized_message);
        } else {
            log::warn!("[{}] {}: {}", kind.category(), kind, sanitized_message);
        }
    }
}

/// Observer that additionally keeps running per-category counters, for a
/// host that wants `/metrics`-style introspection without pulling in a
/// metrics crate.
#[derive(Debug, Default)]
pub struct CountingObserver {
    generic: AtomicU64,
    server: AtomicU64,
    connection: AtomicU64,
    http: AtomicU64,
    tls: AtomicU64,
    router: AtomicU64,
    rate_limit: AtomicU64,
    websocket: AtomicU64,
    config: AtomicU64,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, category: &str) -> &AtomicU64 {
        match category {
            "generic" => &self.generic,
            "server" => &self.server,
            "connection" => &self.connection,
            "http" => &self.http,
            "tls" => &self.tls,
            "router" => &self.router,
            "rate_limit" => &self.rate_limit,
            "websocket" => &self.websocket,
            "config" => &self.config,
            _ => unreachable!("ErrorKind::category() is exhaustive"),
        }
    }

    /// Current count for a given category, e.g. `"tls"` or `"connection"`.
    pub fn count(&self, category: &str) -> u64 {
        self.counter(category).load(Ordering::Relaxed)
    }

    /// Sum of every category's count.
    pub fn total(&self) -> u64 {
        [
            &self.generic,
            &self.server,
            &self.connection,
            &self.http,
            &self.tls,
            &self.router,
            &self.rate_limit,
            &self.websocket,
            &self.config,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }
}

impl ErrorObserver for CountingObserver {
    fn on_error(&self, kind: ErrorKind, _sanitized_message: &str) {
        self.counter(kind.category()).fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_observer_tracks_per_category_and_total() {
        let obs = CountingObserver::new();
        obs.on_error(ErrorKind::TlsHandshake, "handshake failed");
        obs.on_error(ErrorKind::TlsRead, "read failed");
        obs.on_error(ErrorKind::RouteNotFound, "no route");

        assert_eq!(obs.count("tls"), 2);
        assert_eq!(obs.count("router"), 1);
        assert_eq!(obs.count("http"), 0);
        assert_eq!(obs.total(), 3);
    }

    #[test]
    fn logging_observer_does_not_panic() {
        let obs = LoggingObserver;
        obs.on_error(ErrorKind::ConnectionReset, "peer reset");
    }
}
