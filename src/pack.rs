//! Byte-level codec seam shared by the record layer and the handshake
//! message objects. Integers are network order throughout.

use crate::errors::TlsError;

use byteorder::{BigEndian, ByteOrder};

/// A borrowing cursor over received bytes. Every `take_*` either yields the
/// requested bytes or fails with a decode error; nothing panics on truncated
/// adversarial input.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn init(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(TlsError::Decode("short read"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn take_u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u16(&mut self) -> Result<u16, TlsError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn take_u24(&mut self) -> Result<u32, TlsError> {
        Ok(BigEndian::read_u24(self.take(3)?))
    }

    /// A sub-reader over the next `n` bytes.
    pub fn slice(&mut self, n: usize) -> Result<Reader<'a>, TlsError> {
        Ok(Reader::init(self.take(n)?))
    }
}

pub trait Pack: Sized {
    fn pack(&self, out: &mut Vec<u8>);
    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack(&mut out);
        out
    }
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    let mut bytes = [0; 2];
    BigEndian::write_u16(&mut bytes, v);
    out.extend_from_slice(&bytes);
}

pub fn put_u24(out: &mut Vec<u8>, v: u32) {
    let mut bytes = [0; 3];
    BigEndian::write_u24(&mut bytes, v);
    out.extend_from_slice(&bytes);
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut bytes = [0; 8];
    BigEndian::write_u64(&mut bytes, v);
    out.extend_from_slice(&bytes);
}

/// Opaque vector with a one-byte length prefix.
pub fn put_opaque8(out: &mut Vec<u8>, v: &[u8]) {
    debug_assert!(v.len() <= 0xff);
    out.push(v.len() as u8);
    out.extend_from_slice(v);
}

/// Opaque vector with a two-byte length prefix.
pub fn put_opaque16(out: &mut Vec<u8>, v: &[u8]) {
    debug_assert!(v.len() <= 0xffff);
    put_u16(out, v.len() as u16);
    out.extend_from_slice(v);
}

pub fn take_opaque8<'a>(r: &mut Reader<'a>) -> Result<&'a [u8], TlsError> {
    let len = r.take_u8()? as usize;
    r.take(len)
}

pub fn take_opaque16<'a>(r: &mut Reader<'a>) -> Result<&'a [u8], TlsError> {
    let len = r.take_u16()? as usize;
    r.take(len)
}
