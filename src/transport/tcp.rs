use crate::errors::TlsError;
use crate::transport::Transport;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// A connected TCP stream as a record transport. `TcpStream` reads and
/// writes through a shared reference, so both directions run concurrently.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> TcpTransport {
        TcpTransport { stream }
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpTransport, TlsError> {
        Ok(TcpTransport {
            stream: TcpStream::connect(addr)?,
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn send(&self, data: &[u8]) -> Result<(), TlsError> {
        let mut stream = &self.stream;
        stream.write_all(data)?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        let mut stream = &self.stream;
        Ok(stream.read(buf)?)
    }
}
