//! Buffered TLS session.
//!
//! The TLS library's I/O surface is replaced by two in-memory buffers
//! (`MemoryDuplex`) standing in for spec.md §4.7's "two in-memory BIOs":
//! the connection FSM copies socket bytes into the duplex's input cursor,
//! drives the session, then copies the duplex's output cursor back to the
//! socket. `openssl::ssl::SslStream` runs entirely against this duplex,
//! never touching the socket directly.

use crate::config::TlsConfig;
use crate::error::{Error, ErrorKind, Result};
use openssl::ssl::{ErrorCode, HandshakeError, MidHandshakeSslStream, SslAcceptor, SslFiletype, SslMethod, SslStream};
use std::io::{self, Read, Write};
use std::sync::Arc;

/// An in-memory duplex buffer standing in for a pair of memory BIOs: one
/// cursor for bytes arriving from the socket, one for bytes the TLS
/// library wants to send.
#[derive(Default)]
pub struct MemoryDuplex {
    inbound: Vec<u8>,
    inbound_pos: usize,
    outbound: Vec<u8>,
}

impl MemoryDuplex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends ciphertext just read from the socket.
    pub fn feed_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Drains everything the TLS library has queued to send, for the FSM
    /// to write to the socket.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn compact(&mut self) {
        if self.inbound_pos > 0 {
            self.inbound.drain(0..self.inbound_pos);
            self.inbound_pos = 0;
        }
    }
}

impl Read for MemoryDuplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = &self.inbound[self.inbound_pos..];
        if available.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no inbound data"));
        }
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.inbound_pos += n;
        self.compact();
        Ok(n)
    }
}

impl Write for MemoryDuplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outcome of pumping the handshake or a record read/write one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpResult {
    Complete,
    WantRead,
    WantWrite,
}

enum SessionState {
    Handshaking(MidHandshakeSslStream<MemoryDuplex>),
    Established(SslStream<MemoryDuplex>),
    /// Transient placeholder used only while moving a value out of
    /// `SessionState` during a state transition.
    Taken,
}

/// Server-side TLS session for one connection.
pub struct TlsSession {
    state: SessionState,
    handshake_complete: bool,
    shutdown_initiated: bool,
}

impl TlsSession {
    pub fn accept(acceptor: &SslAcceptor) -> Result<Self> {
        let duplex = MemoryDuplex::new();
        match acceptor.accept(duplex) {
            Ok(stream) => Ok(TlsSession {
                state: SessionState::Established(stream),
                handshake_complete: true,
                shutdown_initiated: false,
            }),
            Err(HandshakeError::WouldBlock(mid)) => Ok(TlsSession {
                state: SessionState::Handshaking(mid),
                handshake_complete: false,
                shutdown_initiated: false,
            }),
            Err(HandshakeError::Failure(mid)) => Err(Error::new(
                ErrorKind::TlsHandshake,
                mid.error().to_string(),
            )),
            Err(HandshakeError::SetupFailure(e)) => Err(Error::new(ErrorKind::TlsInit, e.to_string())),
        }
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Feeds bytes just read from the socket into the session's inbound
    /// buffer. Call before [`TlsSession::drive_handshake`] or
    /// [`TlsSession::read_plaintext`].
    pub fn feed_ciphertext(&mut self, bytes: &[u8]) {
        match &mut self.state {
            SessionState::Handshaking(mid) => mid.get_mut().feed_inbound(bytes),
            SessionState::Established(stream) => stream.get_mut().feed_inbound(bytes),
            SessionState::Taken => unreachable!(),
        }
    }

    /// Drains ciphertext the session wants written to the socket.
    pub fn take_ciphertext(&mut self) -> Vec<u8> {
        match &mut self.state {
            SessionState::Handshaking(mid) => mid.get_mut().take_outbound(),
            SessionState::Established(stream) => stream.get_mut().take_outbound(),
            SessionState::Taken => unreachable!(),
        }
    }

    /// Advances the handshake by one step. Call repeatedly, pumping
    /// ciphertext in/out between calls, until it reports `Complete`.
    pub fn drive_handshake(&mut self) -> Result<PumpResult> {
        if self.handshake_complete {
            return Ok(PumpResult::Complete);
        }
        let SessionState::Handshaking(mid) = std::mem::replace(&mut self.state, SessionState::Taken) else {
            unreachable!("drive_handshake called after handshake completed")
        };
        match mid.handshake() {
            Ok(stream) => {
                self.state = SessionState::Established(stream);
                self.handshake_complete = true;
                Ok(PumpResult::Complete)
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                let code = mid.error().code();
                self.state = SessionState::Handshaking(mid);
                Ok(classify_want(code))
            }
            Err(HandshakeError::Failure(mid)) => Err(Error::new(ErrorKind::TlsHandshake, mid.error().to_string())),
            Err(HandshakeError::SetupFailure(e)) => Err(Error::new(ErrorKind::TlsInit, e.to_string())),
        }
    }

    /// Reads decrypted application bytes. Must only be called once the
    /// handshake has completed.
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<(usize, PumpResult)> {
        let SessionState::Established(stream) = &mut self.state else {
            return Err(Error::new(ErrorKind::TlsRead, "handshake not complete"));
        };
        match stream.read(buf) {
            Ok(n) => Ok((n, PumpResult::Complete)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok((0, PumpResult::WantRead)),
            Err(e) => Err(Error::new(ErrorKind::TlsRead, e.to_string())),
        }
    }

    /// Encrypts and queues `buf` for sending; call [`TlsSession::take_ciphertext`]
    /// afterward to get the bytes to write to the socket.
    pub fn write_plaintext(&mut self, buf: &[u8]) -> Result<usize> {
        let SessionState::Established(stream) = &mut self.state else {
            return Err(Error::new(ErrorKind::TlsWrite, "handshake not complete"));
        };
        stream.write(buf).map_err(|e| Error::new(ErrorKind::TlsWrite, e.to_string()))
    }

    pub fn initiate_shutdown(&mut self) {
        self.shutdown_initiated = true;
        if let SessionState::Established(stream) = &mut self.state {
            let _ = stream.shutdown();
        }
    }

    pub fn shutdown_initiated(&self) -> bool {
        self.shutdown_initiated
    }
}

fn classify_want(code: ErrorCode) -> PumpResult {
    if code == ErrorCode::WANT_WRITE {
        PumpResult::WantWrite
    } else {
        PumpResult::WantRead
    }
}

/// Builds an `SslAcceptor` from configuration. Session tickets, SNI
/// callbacks, and OCSP stapling are configuration surfaces this exposes;
/// their wire protocols are delegated entirely to `openssl`.
pub fn build_acceptor(config: &TlsConfig) -> Result<Arc<SslAcceptor>> {
    let method = SslMethod::tls();
    let mut builder = openssl::ssl::SslAcceptor::mozilla_intermediate_v5(method)
        .map_err(|e| Error::new(ErrorKind::TlsContext, e.to_string()))?;

    builder
        .set_private_key_file(&config.private_key_file, SslFiletype::PEM)
        .map_err(|e| Error::new(ErrorKind::TlsKeyLoad, e.to_string()))?;
    builder
        .set_certificate_chain_file(&config.cert_chain_file)
        .map_err(|e| Error::new(ErrorKind::TlsCertLoad, e.to_string()))?;

    for extra in &config.extra_chain_certs {
        let cert = std::fs::read(extra).map_err(|e| Error::new(ErrorKind::TlsCertLoad, e.to_string()))?;
        let cert = openssl::x509::X509::from_pem(&cert).map_err(|e| Error::new(ErrorKind::TlsCertLoad, e.to_string()))?;
        builder
            .add_extra_chain_cert(cert)
            .map_err(|e| Error::new(ErrorKind::TlsCertLoad, e.to_string()))?;
    }

    if let Some(ca_file) = &config.ca_file {
        builder
            .set_ca_file(ca_file)
            .map_err(|e| Error::new(ErrorKind::TlsCertLoad, e.to_string()))?;
    }

    if config.client_auth {
        let mut verify = openssl::ssl::SslVerifyMode::PEER;
        verify.set(openssl::ssl::SslVerifyMode::FAIL_IF_NO_PEER_CERT, true);
        builder.set_verify(verify);
    }

    if let Some(suites) = &config.cipher_suites {
        builder
            .set_cipher_list(suites)
            .map_err(|e| Error::new(ErrorKind::TlsContext, e.to_string()))?;
    }
    if config.tls13_enabled {
        if let Some(suites) = &config.tls13_cipher_suites {
            builder
                .set_ciphersuites(suites)
                .map_err(|e| Error::new(ErrorKind::TlsContext, e.to_string()))?;
        }
    }

    Ok(Arc::new(builder.build()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_duplex_read_blocks_until_fed() {
        let mut duplex = MemoryDuplex::new();
        let mut buf = [0u8; 4];
        let err = duplex.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        duplex.feed_inbound(b"abcd");
        let n = duplex.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn memory_duplex_write_accumulates_outbound() {
        let mut duplex = MemoryDuplex::new();
        duplex.write_all(b"hello").unwrap();
        assert!(duplex.has_outbound());
        assert_eq!(duplex.take_outbound(), b"hello".to_vec());
        assert!(!duplex.has_outbound());
    }
}
