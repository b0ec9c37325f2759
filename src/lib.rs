//! # corehttp
//!
//! An embeddable HTTP/1.1 server core: a per-connection state machine, an
//! adaptive method+path router, an LRU static-file cache, a buffered TLS
//! session layer, and a WebSocket upgrade path, all running atop a `tokio`
//! runtime.
//!
//! ## Architecture
//!
//! - [`config`] — the configuration surface a host builds or deserializes
//! - [`error`] — the closed error taxonomy every subsystem reports through
//! - [`observer`] — the error-observation seam a host installs on a [`server::Server`]
//! - [`reactor`] — a thin seam over the `tokio` runtime handle
//! - [`http`] — the wire format: headers, request/response types, the parser
//! - [`router`] — method+path dispatch, linear below a threshold and a trie above it
//! - [`cache`] — the LRU cache backing the static-file service
//! - [`fs`] — bounded-concurrency async file reads and chunked streaming
//! - [`staticfiles`] — safe path resolution and conditional-request serving
//! - [`tls`] — a buffered TLS session over an in-memory duplex
//! - [`websocket`] — RFC 6455 frame codec and handshake
//! - [`connection`] — the per-connection lifecycle tying the above together
//! - [`server`] — the accept loop

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod fs;
pub mod http;
pub mod observer;
pub mod reactor;
pub mod router;
pub mod server;
pub mod staticfiles;
pub mod tls;
pub mod websocket;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use router::{Handler, Router};
pub use server::Server;
