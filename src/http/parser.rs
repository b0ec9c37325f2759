//! Byte-stream HTTP/1.x parser.
//!
//! A pull interface over a connection's read buffer: `feed` is called with
//! newly read bytes and drives a sequence of callbacks on a
//! [`ParserCallbacks`] implementor. The crate has no FFI boundary, so the
//! callbacks are plain trait methods rather than the function-pointer
//! provider structs the original C parser used.

use super::headers::HeaderList;
use super::message::{Method, Version};
use crate::error::{Error, ErrorKind, Result};
use bytes::{Buf, BytesMut};

/// Callbacks the parser drives as it recognizes each piece of a message.
/// Mirrors `on_message_begin` / `on_url` / `on_header_field` /
/// `on_header_value` / `on_headers_complete` / `on_body` /
/// `on_message_complete` from the pull-parser contract; header
/// field/value callbacks may fire more than once per logical header and
/// the implementor is expected to accumulate (see
/// [`HeaderList::append_or_push`]).
pub trait ParserCallbacks {
    fn on_message_begin(&mut self) {}
    fn on_method_and_target(&mut self, method: Method, target: &str, version: Version);
    fn on_header_field(&mut self, field: &str);
    fn on_header_value(&mut self, value: &str);
    fn on_headers_complete(&mut self) {}
    fn on_body(&mut self, chunk: &[u8]);
    fn on_message_complete(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    StartLine,
    Headers,
    /// Headers are fully parsed but the caller hasn't yet told the parser
    /// how the body is framed via `start_body`. Parsing pauses here so
    /// body bytes already in the buffer are never mistaken for more
    /// header lines.
    AwaitingBodyFraming,
    BodyContentLength(usize),
    BodyChunkedSize,
    BodyChunkedData(usize),
    BodyChunkedTrailer,
    Complete,
}

/// One parser instance per request; the connection constructs a fresh one
/// after each `on_message_complete` for keep-alive pipelining.
pub struct Parser {
    stage: Stage,
    max_header_size: usize,
    max_body_size: usize,
    max_url_size: usize,
    headers_byte_count: usize,
    pending_field: Option<String>,
    last_field_for_value: Option<String>,
    content_length: Option<usize>,
    chunked: bool,
    body_read: usize,
}

impl Parser {
    pub fn new(max_header_size: usize, max_body_size: usize, max_url_size: usize) -> Self {
        Parser {
            stage: Stage::StartLine,
            max_header_size,
            max_body_size,
            max_url_size,
            headers_byte_count: 0,
            pending_field: None,
            last_field_for_value: None,
            content_length: None,
            chunked: false,
            body_read: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// Consumes as much of `buf` as forms complete parse units, driving
    /// `cb` along the way. Leaves any trailing partial line/chunk in
    /// `buf` for the next call. Returns `Ok(())` on progress (possibly
    /// zero bytes if waiting on more input) or an error on malformed
    /// input.
    pub fn feed(&mut self, buf: &mut BytesMut, cb: &mut impl ParserCallbacks) -> Result<()> {
        loop {
            match self.stage {
                Stage::StartLine => {
                    if !self.try_parse_start_line(buf, cb)? {
                        return Ok(());
                    }
                }
                Stage::Headers => {
                    if !self.try_parse_header_line(buf, cb)? {
                        return Ok(());
                    }
                }
                Stage::AwaitingBodyFraming => return Ok(()),
                Stage::BodyContentLength(remaining) => {
                    if remaining == 0 {
                        self.stage = Stage::Complete;
                        cb.on_message_complete();
                        return Ok(());
                    }
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(buf.len());
                    let chunk = buf.split_to(take);
                    cb.on_body(&chunk);
                    self.body_read += take;
                    self.stage = Stage::BodyContentLength(remaining - take);
                }
                Stage::BodyChunkedSize => {
                    if !self.try_parse_chunk_size(buf)? {
                        return Ok(());
                    }
                }
                Stage::BodyChunkedData(remaining) => {
                    if remaining == 0 {
                        // consume trailing CRLF after chunk data
                        if buf.len() < 2 {
                            return Ok(());
                        }
                        buf.advance(2);
                        self.stage = Stage::BodyChunkedSize;
                        continue;
                    }
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(buf.len());
                    let chunk = buf.split_to(take);
                    cb.on_body(&chunk);
                    self.body_read += take;
                    if self.body_read > self.max_body_size {
                        return Err(Error::from_kind(ErrorKind::BodyTooLarge));
                    }
                    self.stage = Stage::BodyChunkedData(remaining - take);
                }
                Stage::BodyChunkedTrailer => {
                    // final CRLF after the zero-size chunk's trailers
                    if let Some(pos) = find_crlf(buf) {
                        if pos == 0 {
                            buf.advance(2);
                            self.stage = Stage::Complete;
                            cb.on_message_complete();
                            return Ok(());
                        }
                        // discard one trailer header line, RFC 7230 §4.1.2
                        buf.advance(pos + 2);
                        continue;
                    }
                    return Ok(());
                }
                Stage::Complete => return Ok(()),
            }
        }
    }

    fn try_parse_start_line(&mut self, buf: &mut BytesMut, cb: &mut impl ParserCallbacks) -> Result<bool> {
        let Some(pos) = find_crlf(buf) else {
            if buf.len() > self.max_url_size + 32 {
                return Err(Error::from_kind(ErrorKind::Malformed));
            }
            return Ok(false);
        };
        let line = buf.split_to(pos);
        buf.advance(2);
        let line = std::str::from_utf8(&line).map_err(|_| Error::from_kind(ErrorKind::Malformed))?;
        let mut parts = line.splitn(3, ' ');
        let method_str = parts.next().ok_or_else(|| Error::from_kind(ErrorKind::Malformed))?;
        let target = parts.next().ok_or_else(|| Error::from_kind(ErrorKind::Malformed))?;
        let version_str = parts.next().ok_or_else(|| Error::from_kind(ErrorKind::Malformed))?;

        if target.len() > self.max_url_size {
            return Err(Error::from_kind(ErrorKind::Malformed));
        }
        let method = Method::from_bytes(method_str.as_bytes())
            .ok_or_else(|| Error::from_kind(ErrorKind::InvalidMethod))?;
        let version = match version_str {
            "HTTP/1.0" => Version::Http10,
            "HTTP/1.1" => Version::Http11,
            _ => return Err(Error::from_kind(ErrorKind::InvalidVersion)),
        };

        cb.on_message_begin();
        cb.on_method_and_target(method, target, version);
        self.stage = Stage::Headers;
        Ok(true)
    }

    fn try_parse_header_line(&mut self, buf: &mut BytesMut, cb: &mut impl ParserCallbacks) -> Result<bool> {
        let Some(pos) = find_crlf(buf) else {
            if self.headers_byte_count + buf.len() > self.max_header_size {
                return Err(Error::from_kind(ErrorKind::HeaderTooLarge));
            }
            return Ok(false);
        };
        let line = buf.split_to(pos);
        buf.advance(2);
        self.headers_byte_count += pos + 2;
        if self.headers_byte_count > self.max_header_size {
            return Err(Error::from_kind(ErrorKind::HeaderTooLarge));
        }

        if line.is_empty() {
            return self.finish_headers(cb);
        }

        let line = std::str::from_utf8(&line).map_err(|_| Error::from_kind(ErrorKind::Malformed))?;
        if line.starts_with(' ') || line.starts_with('\t') {
            // header-value continuation (obs-fold); rejected rather than
            // accepted per RFC 7230 §3.2.4 recommendation for new parsers.
            return Err(Error::from_kind(ErrorKind::Malformed));
        }
        let (field, value) = line
            .split_once(':')
            .ok_or_else(|| Error::from_kind(ErrorKind::Malformed))?;
        validate_field_name(field)?;
        let value = value.trim();

        self.pending_field = Some(field.to_string());
        cb.on_header_field(field);
        cb.on_header_value(value);
        self.last_field_for_value = self.pending_field.take();
        Ok(true)
    }

    fn finish_headers(&mut self, cb: &mut impl ParserCallbacks) -> Result<bool> {
        self.stage = Stage::AwaitingBodyFraming;
        cb.on_headers_complete();
        Ok(true)
    }

    fn try_parse_chunk_size(&mut self, buf: &mut BytesMut) -> Result<bool> {
        let Some(pos) = find_crlf(buf) else {
            return Ok(false);
        };
        let line = buf.split_to(pos);
        buf.advance(2);
        let line = std::str::from_utf8(&line).map_err(|_| Error::from_kind(ErrorKind::Malformed))?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| Error::from_kind(ErrorKind::Malformed))?;
        if size == 0 {
            self.stage = Stage::BodyChunkedTrailer;
        } else {
            if self.body_read + size > self.max_body_size {
                return Err(Error::from_kind(ErrorKind::BodyTooLarge));
            }
            self.stage = Stage::BodyChunkedData(size);
        }
        Ok(true)
    }

    /// Called once headers are known complete, to decide body framing.
    /// `content_length` and `transfer_encoding_chunked` must already have
    /// been extracted by the caller from the accumulated headers; having
    /// both set is a malformed request per RFC 7230 §3.3.3 step 3.
    pub fn start_body(&mut self, content_length: Option<usize>, chunked: bool) -> Result<()> {
        if content_length.is_some() && chunked {
            return Err(Error::from_kind(ErrorKind::Malformed));
        }
        self.content_length = content_length;
        self.chunked = chunked;
        self.stage = match (content_length, chunked) {
            (_, true) => Stage::BodyChunkedSize,
            (Some(0), false) | (None, false) => {
                self.stage = Stage::Complete;
                return Ok(());
            }
            (Some(n), false) => {
                if n > self.max_body_size {
                    return Err(Error::from_kind(ErrorKind::BodyTooLarge));
                }
                Stage::BodyContentLength(n)
            }
        };
        Ok(())
    }
}

fn find_crlf(buf: &BytesMut) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Header field names may not contain CTLs or HTTP separators (RFC 7230
/// §3.2.6's `token` production).
fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::from_kind(ErrorKind::Malformed));
    }
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";
    for &b in name.as_bytes() {
        if b < 0x21 || b == 0x7f || SEPARATORS.contains(&b) {
            return Err(Error::from_kind(ErrorKind::Malformed));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        method: Option<Method>,
        target: String,
        headers: HeaderList,
        body: Vec<u8>,
        complete: bool,
    }

    impl ParserCallbacks for Recorder {
        fn on_method_and_target(&mut self, method: Method, target: &str, _version: Version) {
            self.method = Some(method);
            self.target = target.to_string();
        }
        fn on_header_field(&mut self, _field: &str) {}
        fn on_header_value(&mut self, _value: &str) {}
        fn on_body(&mut self, chunk: &[u8]) {
            self.body.extend_from_slice(chunk);
        }
        fn on_message_complete(&mut self) {
            self.complete = true;
        }
    }

    #[test]
    fn parses_simple_get_with_content_length_body() {
        let mut parser = Parser::new(16 * 1024, 1024, 2048);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(
            &b"GET /x HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nhi"[..],
        );
        parser.feed(&mut buf, &mut rec).unwrap();
        parser.start_body(Some(2), false).unwrap();
        parser.feed(&mut buf, &mut rec).unwrap();

        assert_eq!(rec.method, Some(Method::Get));
        assert_eq!(rec.target, "/x");
        assert_eq!(rec.body, b"hi");
        assert!(rec.complete);
    }

    #[test]
    fn rejects_both_content_length_and_chunked() {
        let mut parser = Parser::new(16 * 1024, 1024, 2048);
        let err = parser.start_body(Some(5), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn rejects_unknown_method() {
        let mut parser = Parser::new(16 * 1024, 1024, 2048);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"FOO / HTTP/1.1\r\n\r\n"[..]);
        let err = parser.feed(&mut buf, &mut rec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMethod);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut parser = Parser::new(16 * 1024, 1024, 2048);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"GET / HTTP/2.0\r\n\r\n"[..]);
        let err = parser.feed(&mut buf, &mut rec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    }

    #[test]
    fn rejects_header_over_cap() {
        let mut parser = Parser::new(32, 1024, 2048);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        buf.extend_from_slice(format!("X-Long: {}\r\n\r\n", "a".repeat(64)).as_bytes());
        let err = parser.feed(&mut buf, &mut rec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeaderTooLarge);
    }

    #[test]
    fn parses_chunked_body() {
        let mut parser = Parser::new(16 * 1024, 1024, 2048);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from(&b"POST /up HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        parser.feed(&mut buf, &mut rec).unwrap();
        parser.start_body(None, true).unwrap();
        buf.extend_from_slice(b"4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n");
        parser.feed(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.body, b"wikipedia");
        assert!(rec.complete);
    }
}
