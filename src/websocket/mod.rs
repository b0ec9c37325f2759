//! RFC 6455 WebSocket frame codec, handshake accept-key derivation, and
//! fragmented-message reassembly.
//!
//! Frame layout and masking are grounded in the bit-indexed header view
//! from `PrivateRookie-ws-client/src/frame.rs`; the accept-key derivation
//! follows the same crate's `protocol.rs`.

use crate::error::{Error, ErrorKind, Result};
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub fn derive_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(ACCEPT_GUID);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(b: u8) -> Option<OpCode> {
        match b {
            0x0 => Some(OpCode::Continue),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Which side a frame is being parsed/built for. Per RFC 6455 §5.1, the
/// client always masks and the server never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Frame {
            fin: true,
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Frame {
            fin: true,
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Frame {
            fin: true,
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Frame {
            fin: true,
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.extend_from_slice(reason.as_bytes());
        Frame {
            fin: true,
            opcode: OpCode::Close,
            payload: payload.freeze(),
        }
    }

    /// Parses exactly one frame from the front of `buf`, returning `None`
    /// if `buf` doesn't yet contain a complete frame. Unmasking happens
    /// in place; per §5.1, a server MUST reject an unmasked frame and a
    /// client MUST reject a masked one.
    pub fn parse(buf: &mut BytesMut, expected_from: Role) -> Result<Option<Frame>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let rsv = byte0 & 0x70;
        if rsv != 0 {
            return Err(Error::new(ErrorKind::WebSocketFrame, "reserved bits set without extension"));
        }
        let opcode = OpCode::from_u8(byte0 & 0x0F)
            .ok_or_else(|| Error::from_kind(ErrorKind::WebSocketInvalidOpcode))?;

        let masked = byte1 & 0x80 != 0;
        let expect_masked = expected_from == Role::Client;
        if masked != expect_masked {
            return Err(Error::new(ErrorKind::WebSocketFrame, "masking bit does not match sender role"));
        }

        let mut offset = 2usize;
        // The wire field is 7 bits; always promote to a u64 immediately
        // (Design Note §9's overflow hazard) rather than storing back
        // into a narrow field.
        let len7 = (byte1 & 0x7F) as u64;
        let payload_len: u64 = if len7 == 126 {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let n = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u64;
            offset += 2;
            n
        } else if len7 == 127 {
            if buf.len() < offset + 8 {
                return Ok(None);
            }
            let mut bytes8 = [0u8; 8];
            bytes8.copy_from_slice(&buf[offset..offset + 8]);
            offset += 8;
            u64::from_be_bytes(bytes8)
        } else {
            len7
        };

        let masking_key = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let total_len = offset + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(offset);
        let mut payload = buf.split_to(payload_len as usize);

        if let Some(key) = masking_key {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }

    /// Serializes this frame for sending as `role`.
    pub fn build(&self, role: Role) -> Bytes {
        let mut out = BytesMut::with_capacity(self.payload.len() + 14);
        let byte0 = (if self.fin { 0x80 } else { 0x00 }) | self.opcode.as_u8();
        out.put_u8(byte0);

        let mask_bit = if role == Role::Client { 0x80 } else { 0x00 };
        let len = self.payload.len();
        if len < 126 {
            out.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.put_u8(mask_bit | 126);
            out.put_u16(len as u16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }

        if role == Role::Client {
            let key: [u8; 4] = rand_mask_key();
            out.extend_from_slice(&key);
            let mut masked = self.payload.to_vec();
            for (i, byte) in masked.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
            out.extend_from_slice(&masked);
        } else {
            out.extend_from_slice(&self.payload);
        }

        out.freeze()
    }
}

/// A process-local, non-cryptographic mask key generator. WebSocket
/// masking defends against cache-poisoning proxies, not confidentiality,
/// so a simple time-seeded generator is sufficient for a server that
/// never masks its own frames (only used by tests exercising the client
/// role).
fn rand_mask_key() -> [u8; 4] {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos.to_ne_bytes()
}

/// Reassembles a fragmented message per RFC 6455 §5.4: a `Continue` frame
/// extends the buffer started by the most recent non-`Continue` frame;
/// delivery happens only once `fin` is set.
#[derive(Default)]
pub struct FragmentAssembler {
    in_progress: Option<(OpCode, BytesMut)>,
}

pub enum AssembledMessage {
    /// Not yet complete; more continuation frames expected.
    Pending,
    /// A full, possibly-fragmented message is ready for delivery.
    Complete(OpCode, Bytes),
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) -> Result<AssembledMessage> {
        if frame.opcode.is_control() {
            // Control frames are never fragmented and bypass reassembly.
            return Ok(AssembledMessage::Complete(frame.opcode, frame.payload));
        }

        match frame.opcode {
            OpCode::Continue => {
                let Some((opcode, buf)) = self.in_progress.as_mut() else {
                    return Err(Error::new(ErrorKind::WebSocketFrame, "continuation with no prior frame"));
                };
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    let opcode = *opcode;
                    let (_, buf) = self.in_progress.take().unwrap();
                    Ok(AssembledMessage::Complete(opcode, buf.freeze()))
                } else {
                    Ok(AssembledMessage::Pending)
                }
            }
            _ => {
                if self.in_progress.is_some() {
                    return Err(Error::new(ErrorKind::WebSocketFrame, "new message started before prior one finished"));
                }
                if frame.fin {
                    Ok(AssembledMessage::Complete(frame.opcode, frame.payload))
                } else {
                    let mut buf = BytesMut::new();
                    buf.extend_from_slice(&frame.payload);
                    self.in_progress = Some((frame.opcode, buf));
                    Ok(AssembledMessage::Pending)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        assert_eq!(
            derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn build_then_parse_round_trips_client_frame() {
        let frame = Frame::text(Bytes::from_static(b"hello"));
        let wire = frame.build(Role::Client);
        let mut buf = BytesMut::from(&wire[..]);
        let parsed = Frame::parse(&mut buf, Role::Client).unwrap().unwrap();
        assert_eq!(parsed.opcode, OpCode::Text);
        assert_eq!(&parsed.payload[..], b"hello");
        assert!(parsed.fin);
    }

    #[test]
    fn server_frames_are_never_masked() {
        let frame = Frame::text(Bytes::from_static(b"hi"));
        let wire = frame.build(Role::Server);
        assert_eq!(wire[1] & 0x80, 0, "server-sent frame must not set the mask bit");
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        // A server-received frame that forgot to set the mask bit.
        let wire = Frame::text(Bytes::from_static(b"x")).build(Role::Server);
        let mut buf = BytesMut::from(&wire[..]);
        let err = Frame::parse(&mut buf, Role::Client).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WebSocketFrame);
    }

    #[test]
    fn length_promotes_past_seven_bits_without_wrapping() {
        let payload = vec![0u8; 200];
        let frame = Frame::binary(Bytes::from(payload.clone()));
        let wire = frame.build(Role::Server);
        let mut buf = BytesMut::from(&wire[..]);
        let parsed = Frame::parse(&mut buf, Role::Server).unwrap().unwrap();
        assert_eq!(parsed.payload.len(), 200);
    }

    #[test]
    fn fragment_assembler_reassembles_before_delivery() {
        let mut assembler = FragmentAssembler::new();
        let first = Frame {
            fin: false,
            opcode: OpCode::Text,
            payload: Bytes::from_static(b"wiki"),
        };
        let cont = Frame {
            fin: true,
            opcode: OpCode::Continue,
            payload: Bytes::from_static(b"pedia"),
        };

        assert!(matches!(assembler.push(first).unwrap(), AssembledMessage::Pending));
        match assembler.push(cont).unwrap() {
            AssembledMessage::Complete(op, payload) => {
                assert_eq!(op, OpCode::Text);
                assert_eq!(&payload[..], b"wikipedia");
            }
            AssembledMessage::Pending => panic!("expected completion on fin frame"),
        }
    }
}
