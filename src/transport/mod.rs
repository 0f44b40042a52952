//! Byte transports the record layer runs over.

mod pipe;
mod tcp;

pub use pipe::{pipe, PipeEnd};
pub use tcp::TcpTransport;

use crate::errors::TlsError;

use std::sync::Arc;

/// A full-duplex byte transport. `send` and `recv` may be called from
/// different threads at the same time; implementations must not serialize
/// one direction against the other.
pub trait Transport: Send + Sync {
    /// Write the whole buffer.
    fn send(&self, data: &[u8]) -> Result<(), TlsError>;

    /// Blocking read of up to `buf.len()` bytes. `Ok(0)` means the peer
    /// closed the transport.
    fn recv(&self, buf: &mut [u8]) -> Result<usize, TlsError>;
}

impl<S: Transport> Transport for Arc<S> {
    fn send(&self, data: &[u8]) -> Result<(), TlsError> {
        (**self).send(data)
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        (**self).recv(buf)
    }
}
