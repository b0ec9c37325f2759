//! Closed error taxonomy shared by every subsystem in this crate.
//!
//! Mirrors the origin-grouped error set a libuv-style HTTP core needs: no
//! subsystem invents its own error type, and no operation panics or unwinds
//! across an async boundary on bad input from the network.

use std::fmt;

/// A single closed set of error kinds, grouped by origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Generic
    InvalidParam,
    OutOfMemory,
    NotFound,
    AlreadyExists,
    NullPointer,
    BufferTooSmall,
    Timeout,
    Cancelled,
    NotSupported,

    // Server
    ServerInit,
    ServerListen,
    ServerStop,
    ConnectionLimit,
    ServerAlreadyRunning,
    ServerNotRunning,
    InvalidConfig,

    // Connection
    ConnectionInit,
    ConnectionAccept,
    ConnectionStart,
    ConnectionClose,
    ConnectionReset,
    ConnectionTimeout,
    ConnectionRefused,
    ConnectionBroken,

    // HTTP
    RequestInit,
    ResponseInit,
    ResponseSend,
    InvalidMethod,
    InvalidVersion,
    HeaderTooLarge,
    BodyTooLarge,
    Malformed,
    FileTooLarge,
    Io,

    // TLS
    TlsInit,
    TlsContext,
    TlsHandshake,
    TlsCertLoad,
    TlsKeyLoad,
    TlsVerifyFailed,
    TlsExpired,
    TlsNotYetValid,
    TlsRead,
    TlsWrite,
    TlsWantRead,
    TlsWantWrite,

    // Router
    RouterInit,
    RouterAdd,
    RouteNotFound,
    RouteAlreadyExists,
    InvalidRoutePattern,

    // Rate limit
    RateLimitExceeded,

    // WebSocket
    WebSocketInit,
    WebSocketHandshake,
    WebSocketFrame,
    WebSocketTooLarge,
    WebSocketInvalidOpcode,
    WebSocketNotConnected,
    WebSocketAlreadyConnected,
    WebSocketClosed,

    // Config
    ConfigParse,
    ConfigInvalid,
    ConfigFileNotFound,
    ConfigMissingRequired,
}

impl ErrorKind {
    /// Origin category this kind belongs to, used for logging and metrics
    /// grouping.
    pub fn category(self) -> &'static str {
        use ErrorKind::*;
        match self {
            InvalidParam | OutOfMemory | NotFound | AlreadyExists | NullPointer
            | BufferTooSmall | Timeout | Cancelled | NotSupported => "generic",
            ServerInit | ServerListen | ServerStop | ConnectionLimit | ServerAlreadyRunning
            | ServerNotRunning | InvalidConfig => "server",
            ConnectionInit | ConnectionAccept | ConnectionStart | ConnectionClose
            | ConnectionReset | ConnectionTimeout | ConnectionRefused | ConnectionBroken => {
                "connection"
            }
            RequestInit | ResponseInit | ResponseSend | InvalidMethod | InvalidVersion
            | HeaderTooLarge | BodyTooLarge | Malformed | FileTooLarge | Io => "http",
            TlsInit | TlsContext | TlsHandshake | TlsCertLoad | TlsKeyLoad | TlsVerifyFailed
            | TlsExpired | TlsNotYetValid | TlsRead | TlsWrite | TlsWantRead | TlsWantWrite => {
                "tls"
            }
            RouterInit | RouterAdd | RouteNotFound | RouteAlreadyExists
            | InvalidRoutePattern => "router",
            RateLimitExceeded => "rate_limit",
            WebSocketInit | WebSocketHandshake | WebSocketFrame | WebSocketTooLarge
            | WebSocketInvalidOpcode | WebSocketNotConnected | WebSocketAlreadyConnected
            | WebSocketClosed => "websocket",
            ConfigParse | ConfigInvalid | ConfigFileNotFound | ConfigMissingRequired => "config",
        }
    }

    /// Whether this error is retryable on the transport (EAGAIN-family
    /// writes, TLS want-read/want-write loops, transient accept failures).
    /// Everything else is fatal to the connection it occurred on.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::TlsWantRead
                | ErrorKind::TlsWantWrite
                | ErrorKind::ConnectionRefused
                | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An error carrying a kind plus an optional, already-sanitized message.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: sanitize_message(&message.into()),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: kind.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.category(), self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Substrings that must never reach a log line or an HTTP response verbatim.
/// Matched case-insensitively. Taken from the original implementation's
/// sanitizer list.
const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "key",
    "token",
    "auth",
    "credential",
    "private",
    "session",
];

/// Cap applied to any sanitized message, matching the original's
/// fixed-size `safe_buffer` convention.
const SANITIZE_CAP: usize = 256;

/// Filters sensitive substrings out of a message and truncates it to a
/// fixed cap. Applied to any error message that will be logged or
/// reflected in a response.
pub fn sanitize_message(message: &str) -> String {
    let lower = message.to_ascii_lowercase();
    let mut redacted = message.to_string();
    for needle in SENSITIVE_SUBSTRINGS {
        if lower.contains(needle) {
            redacted = "[redacted: message withheld, contained sensitive term]".to_string();
            break;
        }
    }
    if redacted.len() > SANITIZE_CAP {
        let mut cut = SANITIZE_CAP;
        while !redacted.is_char_boundary(cut) {
            cut -= 1;
        }
        redacted.truncate(cut);
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_password_case_insensitively() {
        let msg = sanitize_message("failed login: PASSWORD=hunter2");
        assert!(!msg.to_ascii_lowercase().contains("hunter2"));
    }

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(1000);
        let msg = sanitize_message(&long);
        assert!(msg.len() <= SANITIZE_CAP);
    }

    #[test]
    fn passes_clean_messages_through() {
        let msg = sanitize_message("connection reset by peer");
        assert_eq!(msg, "connection reset by peer");
    }

    #[test]
    fn recoverable_classification() {
        assert!(ErrorKind::TlsWantRead.is_recoverable());
        assert!(!ErrorKind::Malformed.is_recoverable());
    }
}
