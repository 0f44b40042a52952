//! Handshake message framing. Handshake messages are length-prefixed
//! inside the record payload and may be packed several to a record or
//! split across records, so incoming payloads accumulate in a buffer that
//! yields whole messages.

use crate::errors::TlsError;
use crate::pack::put_u24;

use num_traits::FromPrimitive;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

/// One complete handshake message: its type, its body, and the framed
/// bytes as they appeared on the wire (the transcript wants the latter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: HandshakeType,
    pub body: Vec<u8>,
    pub raw: Vec<u8>,
}

/// Frame a handshake body: type byte, 24-bit length, body.
pub fn frame(kind: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(kind as u8);
    put_u24(&mut out, body.len() as u32);
    out.extend_from_slice(body);
    out
}

#[derive(Default)]
pub struct HandshakeBuffer {
    buf: Vec<u8>,
}

impl HandshakeBuffer {
    pub fn new() -> HandshakeBuffer {
        HandshakeBuffer::default()
    }

    pub fn push(&mut self, record_payload: &[u8]) {
        self.buf.extend_from_slice(record_payload);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The next complete message, or None if more record payloads are
    /// needed first.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, TlsError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let length =
            ((self.buf[1] as usize) << 16) | ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
        let total = 4 + length;
        if self.buf.len() < total {
            return Ok(None);
        }
        let kind =
            HandshakeType::from_u8(self.buf[0]).ok_or(TlsError::Decode("handshake type"))?;
        let raw: Vec<u8> = self.buf.drain(..total).collect();
        let body = raw[4..].to_vec();
        Ok(Some(Frame { kind, body, raw }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_pushes_reassemble() {
        let wire = frame(HandshakeType::Finished, &[9; 12]);
        let mut buf = HandshakeBuffer::new();
        buf.push(&wire[..6]);
        assert!(buf.next_frame().expect("no decode error").is_none());
        buf.push(&wire[6..]);
        let frame = buf.next_frame().expect("decode").expect("complete");
        assert_eq!(frame.kind, HandshakeType::Finished);
        assert_eq!(frame.body, vec![9; 12]);
        assert_eq!(frame.raw, wire);
    }

    #[test]
    fn two_messages_in_one_record_come_out_in_order() {
        let mut wire = frame(HandshakeType::ServerHelloDone, &[]);
        wire.extend_from_slice(&frame(HandshakeType::HelloRequest, &[]));
        let mut buf = HandshakeBuffer::new();
        buf.push(&wire);
        let first = buf.next_frame().expect("decode").expect("first");
        assert_eq!(first.kind, HandshakeType::ServerHelloDone);
        let second = buf.next_frame().expect("decode").expect("second");
        assert_eq!(second.kind, HandshakeType::HelloRequest);
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let mut buf = HandshakeBuffer::new();
        buf.push(&[99, 0, 0, 0]);
        assert!(buf.next_frame().is_err());
    }
}
