//! In-memory duplex transport, used by the loopback tests to run a client
//! and server against each other without a socket.

use crate::errors::TlsError;
use crate::transport::Transport;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

struct Channel {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

struct ChannelState {
    buf: VecDeque<u8>,
    closed: bool,
}

impl Channel {
    fn new() -> Arc<Channel> {
        Arc::new(Channel {
            state: Mutex::new(ChannelState {
                buf: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        })
    }

    fn push(&self, data: &[u8]) -> Result<(), TlsError> {
        let mut state = self.state.lock().map_err(|_| TlsError::ConnectionClosed)?;
        if state.closed {
            return Err(TlsError::ConnectionClosed);
        }
        state.buf.extend(data);
        self.ready.notify_one();
        Ok(())
    }

    fn pull(&self, out: &mut [u8]) -> Result<usize, TlsError> {
        let mut state = self.state.lock().map_err(|_| TlsError::ConnectionClosed)?;
        loop {
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for slot in out.iter_mut().take(n) {
                    *slot = state.buf.pop_front().unwrap_or(0);
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = self
                .ready
                .wait(state)
                .map_err(|_| TlsError::ConnectionClosed)?;
        }
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            self.ready.notify_all();
        }
    }
}

/// One end of an in-memory duplex byte pipe.
pub struct PipeEnd {
    incoming: Arc<Channel>,
    outgoing: Arc<Channel>,
}

/// Two connected pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a = Channel::new();
    let b = Channel::new();
    (
        PipeEnd {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        PipeEnd {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Transport for PipeEnd {
    fn send(&self, data: &[u8]) -> Result<(), TlsError> {
        self.outgoing.push(data)
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        self.incoming.pull(buf)
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.outgoing.close();
        self.incoming.close();
    }
}
