//! Accept loop.
//!
//! One task per accepted connection, bounded by `max_connections` via a
//! counting semaphore — the async generalization of the teacher's
//! thread-per-connection accept loop (`system/default_page/p_base.rs`) and
//! its multi-listener launch shape (`system/server.rs`), collapsed from N
//! independently bootstrapped `pingora::server::Server`s into one `tokio`
//! accept loop per configured listener.

use crate::config::Config;
use crate::connection::{self, ConnectionContext};
use crate::error::{Error, ErrorKind, Result};
use crate::observer::{ErrorObserver, LoggingObserver};
use crate::router::Router;
use crate::staticfiles::StaticContext;
use crate::tls;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// An embeddable HTTP/1.1 server core: owns a listener, a router, and
/// (optionally) a static-file service and TLS acceptor, all sharing one
/// `Arc<ConnectionContext>` across every accepted connection.
pub struct Server {
    config: Config,
    router: Arc<Router>,
    observer: Arc<dyn ErrorObserver>,
}

impl Server {
    /// Builds a server around `config` and `router`. Call
    /// [`Server::with_observer`] before [`Server::run`] to install a
    /// non-default [`ErrorObserver`].
    pub fn new(config: Config, router: Router) -> Self {
        Server {
            config,
            router: Arc::new(router),
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Binds the configured listen address and serves connections until
    /// the process receives an interrupt signal. Each accepted connection
    /// is handled by its own task; connections beyond `max_connections`
    /// wait on a semaphore permit rather than being rejected outright.
    pub async fn run(self) -> Result<()> {
        let mut server_config = self.config.server.clone();
        server_config.clamp_timeout();

        let listener = TcpListener::bind(&server_config.addr_listen)
            .await
            .map_err(|e| Error::new(ErrorKind::ServerListen, e.to_string()))?;
        log::info!("listening on {}", server_config.addr_listen);

        let tls_acceptor = match &self.config.tls {
            Some(tls_config) => Some(tls::build_acceptor(tls_config)?),
            None => None,
        };
        let static_files = match self.config.static_files {
            Some(static_config) => Some(Arc::new(StaticContext::new(static_config)?)),
            None => None,
        };

        let ctx = Arc::new(ConnectionContext {
            config: server_config.clone(),
            router: self.router,
            static_files,
            tls_acceptor,
            observer: self.observer,
        });
        let connection_slots = Arc::new(Semaphore::new(server_config.max_connections));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            ctx.observer.on_error(ErrorKind::ConnectionAccept, &e.to_string());
                            continue;
                        }
                    };
                    let permit = connection_slots.clone().acquire_owned().await.expect("semaphore never closed");
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        connection::run_connection(socket, peer, ctx).await;
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn binds_ephemeral_port_successfully() {
        let mut config = Config::default();
        config.server = ServerConfig {
            addr_listen: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = Server::new(config, Router::new(100));

        let run = tokio::time::timeout(std::time::Duration::from_millis(50), server.run()).await;
        assert!(run.is_err(), "run() should still be serving when the timeout fires");
    }
}
