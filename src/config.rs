//! Configuration surface.
//!
//! These structs describe the shape of server configuration; parsing a
//! config file into one is an external collaborator's job (out of scope
//! for this crate), but a host can always build one by hand, via
//! `serde_json`, or any other `Deserialize`-compatible source.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration handed to [`crate::server::Server::new`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub static_files: Option<StaticConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            tls: None,
            static_files: None,
        }
    }
}

/// Core listener and connection-handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the listening socket binds to (e.g. `"0.0.0.0:8080"`).
    pub addr_listen: String,

    /// Maximum number of simultaneously active connections.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,

    /// Per-connection idle/processing deadline, restarted on progress.
    /// Clamped to the 5-300s range via [`ServerConfig::clamp_timeout`].
    #[serde(default = "defaults::connection_timeout", with = "duration_secs")]
    pub connection_timeout: Duration,

    /// Keep-alive idle timeout between pipelined requests on one connection.
    #[serde(default = "defaults::keep_alive_timeout", with = "duration_secs")]
    pub keep_alive_timeout: Duration,

    /// TCP accept backlog.
    #[serde(default = "defaults::accept_backlog")]
    pub accept_backlog: u32,

    /// Initial size of a connection's read buffer.
    #[serde(default = "defaults::read_buffer_initial")]
    pub read_buffer_initial: usize,

    /// Hard cap the read buffer may grow to before the parser fails with
    /// `HeaderTooLarge`/`BodyTooLarge`.
    #[serde(default = "defaults::read_buffer_max")]
    pub read_buffer_max: usize,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "defaults::max_body_size")]
    pub max_body_size: usize,

    /// Maximum accepted total header size in bytes.
    #[serde(default = "defaults::max_header_size")]
    pub max_header_size: usize,

    /// Maximum accepted request-target (URL) length in bytes.
    #[serde(default = "defaults::max_url_size")]
    pub max_url_size: usize,

    /// Number of tokio worker threads the server's runtime should use, if
    /// the caller lets the server construct its own runtime. Defaults to
    /// the host's logical CPU count.
    #[serde(default = "defaults::worker_threads")]
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr_listen: "127.0.0.1:8080".to_string(),
            max_connections: defaults::max_connections(),
            connection_timeout: defaults::connection_timeout(),
            keep_alive_timeout: defaults::keep_alive_timeout(),
            accept_backlog: defaults::accept_backlog(),
            read_buffer_initial: defaults::read_buffer_initial(),
            read_buffer_max: defaults::read_buffer_max(),
            max_body_size: defaults::max_body_size(),
            max_header_size: defaults::max_header_size(),
            max_url_size: defaults::max_url_size(),
            worker_threads: defaults::worker_threads(),
        }
    }
}

impl ServerConfig {
    /// Clamps `connection_timeout` into the 5-300s range, in place.
    pub fn clamp_timeout(&mut self) {
        let secs = self.connection_timeout.as_secs().clamp(5, 300);
        self.connection_timeout = Duration::from_secs(secs);
    }
}

/// TLS configuration surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_chain_file: String,
    pub private_key_file: String,
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default)]
    pub client_auth: bool,
    #[serde(default)]
    pub verify_depth: Option<u32>,
    #[serde(default)]
    pub cipher_suites: Option<String>,
    #[serde(default)]
    pub session_tickets: bool,
    #[serde(default)]
    pub session_cache_size: Option<usize>,
    #[serde(default)]
    pub ocsp_stapling: bool,
    #[serde(default)]
    pub dh_params_file: Option<String>,
    #[serde(default)]
    pub crl_file: Option<String>,
    #[serde(default)]
    pub crl_enabled: bool,
    #[serde(default = "defaults::tls13_enabled")]
    pub tls13_enabled: bool,
    #[serde(default)]
    pub tls13_cipher_suites: Option<String>,
    #[serde(default)]
    pub early_data: bool,
    #[serde(default)]
    pub ticket_key: Option<String>,
    #[serde(default)]
    pub ticket_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub extra_chain_certs: Vec<String>,
    /// Handshake deadline; a stuck client is disconnected after this long.
    #[serde(default = "defaults::handshake_timeout", with = "duration_secs")]
    pub handshake_timeout: Duration,
}

/// Static-file service configuration surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticConfig {
    pub root: String,
    #[serde(default = "defaults::index_filename")]
    pub index_filename: String,
    #[serde(default)]
    pub directory_listing: bool,
    #[serde(default = "defaults::etag_enabled")]
    pub etag_enabled: bool,
    #[serde(default = "defaults::last_modified_enabled")]
    pub last_modified_enabled: bool,
    #[serde(default = "defaults::cache_byte_cap")]
    pub cache_byte_cap: usize,
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: i64,
    #[serde(default = "defaults::cache_entry_cap")]
    pub cache_entry_cap: usize,
    #[serde(default = "defaults::sendfile_timeout", with = "duration_secs")]
    pub sendfile_timeout: Duration,
    #[serde(default = "defaults::sendfile_retries")]
    pub sendfile_retries: u32,
    #[serde(default = "defaults::sendfile_chunk_size")]
    pub sendfile_chunk_size: usize,
    #[serde(default)]
    pub custom_header: Option<String>,
    #[serde(default = "defaults::small_file_threshold")]
    pub small_file_threshold: usize,
    #[serde(default = "defaults::streaming_threshold")]
    pub streaming_threshold: usize,
    #[serde(default = "defaults::max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "defaults::max_concurrent_reads")]
    pub max_concurrent_reads: usize,
    #[serde(default = "defaults::router_trie_threshold")]
    pub router_trie_threshold: usize,
}

impl Default for StaticConfig {
    fn default() -> Self {
        StaticConfig {
            root: ".".to_string(),
            index_filename: defaults::index_filename(),
            directory_listing: false,
            etag_enabled: defaults::etag_enabled(),
            last_modified_enabled: defaults::last_modified_enabled(),
            cache_byte_cap: defaults::cache_byte_cap(),
            cache_ttl_secs: defaults::cache_ttl_secs(),
            cache_entry_cap: defaults::cache_entry_cap(),
            sendfile_timeout: defaults::sendfile_timeout(),
            sendfile_retries: defaults::sendfile_retries(),
            sendfile_chunk_size: defaults::sendfile_chunk_size(),
            custom_header: None,
            small_file_threshold: defaults::small_file_threshold(),
            streaming_threshold: defaults::streaming_threshold(),
            max_file_size: defaults::max_file_size(),
            max_concurrent_reads: defaults::max_concurrent_reads(),
            router_trie_threshold: defaults::router_trie_threshold(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Default values for every optional configuration field, named so each
/// default is independently documented and testable.
pub mod defaults {
    use std::time::Duration;

    pub fn max_connections() -> usize {
        1024
    }
    pub fn connection_timeout() -> Duration {
        Duration::from_secs(30)
    }
    pub fn keep_alive_timeout() -> Duration {
        Duration::from_secs(5)
    }
    pub fn accept_backlog() -> u32 {
        1024
    }
    pub fn read_buffer_initial() -> usize {
        4 * 1024
    }
    pub fn read_buffer_max() -> usize {
        1024 * 1024
    }
    pub fn max_body_size() -> usize {
        10 * 1024 * 1024
    }
    pub fn max_header_size() -> usize {
        16 * 1024
    }
    pub fn max_url_size() -> usize {
        8 * 1024
    }
    pub fn worker_threads() -> usize {
        num_cpus::get().max(1)
    }
    pub fn handshake_timeout() -> Duration {
        Duration::from_secs(10)
    }
    pub fn index_filename() -> String {
        "index.html".to_string()
    }
    pub fn etag_enabled() -> bool {
        true
    }
    pub fn last_modified_enabled() -> bool {
        true
    }
    pub fn cache_byte_cap() -> usize {
        64 * 1024 * 1024
    }
    pub fn cache_ttl_secs() -> i64 {
        300
    }
    pub fn cache_entry_cap() -> usize {
        10_000
    }
    pub fn sendfile_timeout() -> Duration {
        Duration::from_secs(30)
    }
    pub fn sendfile_retries() -> u32 {
        3
    }
    pub fn sendfile_chunk_size() -> usize {
        64 * 1024
    }
    pub fn small_file_threshold() -> usize {
        4 * 1024
    }
    pub fn streaming_threshold() -> usize {
        1024 * 1024
    }
    pub fn max_file_size() -> usize {
        100 * 1024 * 1024
    }
    pub fn max_concurrent_reads() -> usize {
        64
    }
    pub fn router_trie_threshold() -> usize {
        100
    }
    pub fn tls13_enabled() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server.addr_listen, cfg.server.addr_listen);
    }

    #[test]
    fn clamp_timeout_enforces_bounds() {
        let mut cfg = ServerConfig::default();
        cfg.connection_timeout = Duration::from_secs(1);
        cfg.clamp_timeout();
        assert_eq!(cfg.connection_timeout, Duration::from_secs(5));

        cfg.connection_timeout = Duration::from_secs(10_000);
        cfg.clamp_timeout();
        assert_eq!(cfg.connection_timeout, Duration::from_secs(300));
    }

    #[test]
    fn static_config_defaults_are_sane() {
        let cfg = StaticConfig::default();
        assert!(cfg.small_file_threshold < cfg.streaming_threshold);
        assert!(cfg.streaming_threshold < cfg.max_file_size);
        assert_eq!(cfg.router_trie_threshold, 100);
    }
}
