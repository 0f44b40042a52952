//! Blocking stream facade over a negotiated connection. The first caller
//! to touch the stream runs the handshake; concurrent callers block on
//! the negotiation gate until it settles, and a failed negotiation poisons
//! the stream for everyone. After negotiation the read and write paths
//! take independent locks, so one direction never waits on the other.

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::client::{ClientConfig, ClientSession};
use crate::errors::TlsError;
use crate::handshake::{HandshakeBuffer, HandshakeType};
use crate::pack::Pack;
use crate::record::{self, ContentType, RecordEvent, HEADER_LEN};
use crate::server::{ServerConfig, ServerSession};
use crate::transport::Transport;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::debug;

enum Peer<S: Transport> {
    Client(ClientSession<Arc<S>>),
    Server(ServerSession<Arc<S>>),
}

impl<S: Transport> Peer<S> {
    fn handshake(&mut self) -> Result<(), TlsError> {
        match self {
            Peer::Client(session) => session.handshake(),
            Peer::Server(session) => session.handshake(),
        }
    }

    fn open_record(
        &mut self,
        header: &[u8; HEADER_LEN],
        payload: Vec<u8>,
    ) -> Result<RecordEvent, TlsError> {
        match self {
            Peer::Client(session) => session.record.open_record(header, payload),
            Peer::Server(session) => session.record.open_record(header, payload),
        }
    }

    fn seal_records(&mut self, content_type: ContentType, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            Peer::Client(session) => {
                record::seal_records(&mut session.record.ctx, content_type, data)
            }
            Peer::Server(session) => {
                record::seal_records(&mut session.record.ctx, content_type, data)
            }
        }
    }

    fn suite_name(&self) -> &'static str {
        match self {
            Peer::Client(session) => session.record.ctx.negotiated_suite_name(),
            Peer::Server(session) => session.record.ctx.negotiated_suite_name(),
        }
    }

    fn receive_ended(&self) -> bool {
        match self {
            Peer::Client(session) => session.record.ctx.receive_ended,
            Peer::Server(session) => session.record.ctx.receive_ended,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Running,
    Done,
    Failed,
}

struct NegotiationGate {
    state: Mutex<GateState>,
    settled: Condvar,
}

impl NegotiationGate {
    fn new() -> NegotiationGate {
        NegotiationGate {
            state: Mutex::new(GateState::Idle),
            settled: Condvar::new(),
        }
    }

    /// Returns true when this caller should run the handshake; false when
    /// another thread already completed it.
    fn enter(&self) -> Result<bool, TlsError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TlsError::AuthenticationFailed)?;
        loop {
            match *state {
                GateState::Idle => {
                    *state = GateState::Running;
                    return Ok(true);
                }
                GateState::Running => {
                    state = self
                        .settled
                        .wait(state)
                        .map_err(|_| TlsError::AuthenticationFailed)?;
                }
                GateState::Done => return Ok(false),
                GateState::Failed => return Err(TlsError::AuthenticationFailed),
            }
        }
    }

    fn settle(&self, ok: bool) {
        if let Ok(mut state) = self.state.lock() {
            *state = if ok { GateState::Done } else { GateState::Failed };
            self.settled.notify_all();
        }
    }

    fn is_done(&self) -> bool {
        self.state
            .lock()
            .map(|s| *s == GateState::Done)
            .unwrap_or(false)
    }
}

/// Read-side state: decrypted bytes not yet handed to a caller, and
/// post-handshake message fragments awaiting completion across records.
struct ReadState {
    plain: VecDeque<u8>,
    handshakes: HandshakeBuffer,
}

/// Lock order is reader, then writer, then peer. The read loop blocks on
/// the transport with only the reader lock held, so writers keep moving
/// while a reader waits for the next record.
pub struct TlsStream<S: Transport> {
    transport: Arc<S>,
    peer: Mutex<Peer<S>>,
    gate: NegotiationGate,
    reader: Mutex<ReadState>,
    writer: Mutex<()>,
}

impl<S: Transport> TlsStream<S> {
    pub fn client(transport: S, config: ClientConfig, host: &str) -> TlsStream<S> {
        let transport = Arc::new(transport);
        TlsStream {
            peer: Mutex::new(Peer::Client(ClientSession::new(
                transport.clone(),
                config,
                host,
            ))),
            transport,
            gate: NegotiationGate::new(),
            reader: Mutex::new(ReadState {
                plain: VecDeque::new(),
                handshakes: HandshakeBuffer::new(),
            }),
            writer: Mutex::new(()),
        }
    }

    pub fn server(transport: S, config: ServerConfig) -> TlsStream<S> {
        let transport = Arc::new(transport);
        TlsStream {
            peer: Mutex::new(Peer::Server(ServerSession::new(transport.clone(), config))),
            transport,
            gate: NegotiationGate::new(),
            reader: Mutex::new(ReadState {
                plain: VecDeque::new(),
                handshakes: HandshakeBuffer::new(),
            }),
            writer: Mutex::new(()),
        }
    }

    fn lock_peer(&self) -> Result<MutexGuard<'_, Peer<S>>, TlsError> {
        self.peer.lock().map_err(|_| TlsError::AuthenticationFailed)
    }

    fn lock_reader(&self) -> Result<MutexGuard<'_, ReadState>, TlsError> {
        self.reader
            .lock()
            .map_err(|_| TlsError::AuthenticationFailed)
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>, TlsError> {
        self.writer
            .lock()
            .map_err(|_| TlsError::AuthenticationFailed)
    }

    /// Run the handshake now, or wait for the one in flight. Idempotent.
    pub fn handshake(&self) -> Result<(), TlsError> {
        if !self.gate.enter()? {
            return Ok(());
        }
        let result = match self.lock_peer() {
            Ok(mut peer) => peer.handshake(),
            Err(err) => Err(err),
        };
        self.gate.settle(result.is_ok());
        // Failures inside negotiation surface as one generic error; the
        // detail already went to the peer as an alert and to the log.
        result.map_err(|err| {
            debug!("handshake failed: {}", err);
            TlsError::AuthenticationFailed
        })
    }

    pub fn is_negotiated(&self) -> bool {
        self.gate.is_done()
    }

    pub fn negotiated_suite(&self) -> Option<&'static str> {
        if !self.is_negotiated() {
            return None;
        }
        self.lock_peer().ok().map(|peer| peer.suite_name())
    }

    /// Read decrypted application data. `Ok(0)` means the peer closed the
    /// connection.
    pub fn read_data(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        if buf.is_empty() {
            return Err(TlsError::InvalidArgument("zero-length read buffer"));
        }
        self.handshake()?;

        let mut state = self.lock_reader()?;
        loop {
            if !state.plain.is_empty() {
                let n = buf.len().min(state.plain.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.plain.pop_front().unwrap_or(0);
                }
                return Ok(n);
            }
            if self.lock_peer()?.receive_ended() {
                return Ok(0);
            }

            // Block on the transport without any protocol lock held, so a
            // concurrent writer keeps moving while we wait.
            let (header, payload) = record::recv_wire_record(&*self.transport)?;
            let event = self.lock_peer()?.open_record(&header, payload)?;
            match event {
                RecordEvent::ApplicationData(data) => state.plain.extend(data),
                RecordEvent::Handshake(payload) => {
                    self.on_post_handshake(&mut state, &payload)?;
                }
                RecordEvent::Warning(desc) => {
                    debug!("ignoring warning alert {:?}", desc);
                }
                RecordEvent::Closed => return Ok(0),
                RecordEvent::ChangeCipherSpec | RecordEvent::LegacyHandshake(_) => {
                    return Err(TlsError::UnexpectedMessage("unexpected record after handshake"));
                }
            }
        }
    }

    /// Encrypt and send application data, fragmenting as needed.
    pub fn write_data(&self, data: &[u8]) -> Result<(), TlsError> {
        if data.is_empty() {
            return Ok(());
        }
        self.handshake()?;
        let _direction = self.lock_writer()?;
        let wire = self
            .lock_peer()?
            .seal_records(ContentType::ApplicationData, data)?;
        self.transport.send(&wire)
    }

    /// Send CloseNotify. The transport stays usable for draining.
    pub fn shutdown(&self) -> Result<(), TlsError> {
        let _direction = self.lock_writer()?;
        let wire = self
            .lock_peer()?
            .seal_records(ContentType::Alert, &Alert::close_notify().to_bytes())?;
        self.transport.send(&wire)
    }

    /// Handshake traffic arriving after negotiation. Fragments accumulate
    /// in the read state until a message completes, so a HelloRequest split
    /// across records is still honored.
    fn on_post_handshake(&self, state: &mut ReadState, payload: &[u8]) -> Result<(), TlsError> {
        state.handshakes.push(payload);
        while let Some(frame) = state.handshakes.next_frame()? {
            // Writer lock first: renegotiation and warning alerts send on
            // the transport, and writers must pause while keys change.
            let _direction = self.lock_writer()?;
            let mut peer = self.lock_peer()?;
            match (&mut *peer, frame.kind) {
                (Peer::Client(session), HandshakeType::HelloRequest) => {
                    if session.renegotiate_on_hello_request() {
                        debug!("renegotiating on server hello request");
                        session.handshake()?;
                    } else {
                        session.record.send_alert(Alert::new(
                            AlertLevel::Warning,
                            AlertDescription::NoRenegotiation,
                        ))?;
                    }
                }
                (Peer::Server(session), HandshakeType::ClientHello) => {
                    // Client-initiated renegotiation is declined.
                    session.record.send_alert(Alert::new(
                        AlertLevel::Warning,
                        AlertDescription::NoRenegotiation,
                    ))?;
                }
                _ => {
                    return Err(TlsError::UnexpectedMessage("handshake message after handshake"));
                }
            }
        }
        Ok(())
    }
}

impl<S: Transport> io::Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_data(buf).map_err(io::Error::from)
    }
}

impl<S: Transport> io::Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl From<TlsError> for io::Error {
    fn from(err: TlsError) -> io::Error {
        match err {
            TlsError::StdIoError(inner) => inner,
            TlsError::ConnectionClosed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
