//! Request/response message types.

use super::headers::HeaderList;
use std::collections::BTreeMap;

/// Request method. `Any` exists only as a router wildcard and is never
/// produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Any,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Option<Method> {
        match b {
            b"GET" => Some(Method::Get),
            b"HEAD" => Some(Method::Head),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"CONNECT" => Some(Method::Connect),
            b"OPTIONS" => Some(Method::Options),
            b"TRACE" => Some(Method::Trace),
            b"PATCH" => Some(Method::Patch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Any => "*",
        }
    }
}

/// HTTP version; only the two the parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// A fully or partially parsed request, owned by the connection for the
/// duration of one request/response cycle.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub params: BTreeMap<String, String>,
}

impl Request {
    pub fn new(method: Method, target: String, version: Version) -> Self {
        let (path, query) = split_target(&target);
        Request {
            method,
            target,
            path,
            query,
            version,
            headers: HeaderList::new(),
            body: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn keep_alive_requested(&self) -> bool {
        match self.headers.get("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => matches!(self.version, Version::Http11),
        }
    }

    pub fn wants_upgrade_to_websocket(&self) -> bool {
        self.headers
            .get("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
            && self
                .headers
                .get("connection")
                .map(|v| v.to_ascii_lowercase().contains("upgrade"))
                .unwrap_or(false)
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

/// A response under construction. Reset between pipelined requests on the
/// same connection via [`Response::reset`].
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub sent: bool,
    pub write_in_progress: bool,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 200,
            headers: HeaderList::new(),
            body: Vec::new(),
            sent: false,
            write_in_progress: false,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn reset(&mut self) {
        self.status = 200;
        self.headers = HeaderList::new();
        self.body.clear();
        self.sent = false;
        self.write_in_progress = false;
    }

    /// Serializes the status line, headers, and body into on-wire bytes.
    /// `Content-Length` is computed here unless already present (e.g. a
    /// handler set it explicitly for a streaming response).
    pub fn serialize(&self, version: Version) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        out.extend_from_slice(version.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.headers.contains("content-length") {
            out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_target_into_path_and_query() {
        let req = Request::new(Method::Get, "/search?q=rust".to_string(), Version::Http11);
        assert_eq!(req.path, "/search");
        assert_eq!(req.query.as_deref(), Some("q=rust"));
    }

    #[test]
    fn http11_defaults_keep_alive_http10_does_not() {
        let req11 = Request::new(Method::Get, "/".to_string(), Version::Http11);
        assert!(req11.keep_alive_requested());
        let req10 = Request::new(Method::Get, "/".to_string(), Version::Http10);
        assert!(!req10.keep_alive_requested());
    }

    #[test]
    fn explicit_connection_close_overrides_version_default() {
        let mut req = Request::new(Method::Get, "/".to_string(), Version::Http11);
        req.headers.set("Connection", "close");
        assert!(!req.keep_alive_requested());
    }

    #[test]
    fn response_serialize_adds_content_length_when_absent() {
        let resp = Response::new().with_status(200).with_body(b"X".to_vec());
        let bytes = resp.serialize(Version::Http11);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("content-length: 1"));
        assert!(text.ends_with('X'));
    }
}
