//! Client side of the handshake.

use crate::context::{Context, HandshakeState};
use crate::crypto::{self, ConnectionEnd, PRE_MASTER_SECRET_LEN};
use crate::errors::TlsError;
use crate::handshake::{frame, Frame, HandshakeBuffer, HandshakeType};
use crate::messages::{
    Certificate, CertificateVerify, ClientHello, ClientKeyExchange, Finished, ServerHello,
    ServerHelloDone, NULL_COMPRESSION,
};
use crate::pack::{Pack, Reader};
use crate::protocol::SecurityProtocol;
use crate::record::{ContentType, RecordEvent, RecordProtocol};
use crate::rsa::{RsaPrivateKey, RsaPublicKey};
use crate::session;
use crate::transport::Transport;

use std::sync::Arc;

use log::{debug, info};
use ring::constant_time;

/// Extracts the RSA public key from a DER certificate. Certificate parsing
/// and chain validation live outside this crate; callers plug them in here.
pub type KeyExtractor = Arc<dyn Fn(&[u8]) -> Result<RsaPublicKey, TlsError> + Send + Sync>;

/// A certificate chain and its private key, used when the server requests
/// client authentication.
#[derive(Clone)]
pub struct Identity {
    pub chain: Vec<Vec<u8>>,
    pub key: RsaPrivateKey,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub protocol: SecurityProtocol,
    pub key_extractor: KeyExtractor,
    pub identity: Option<Identity>,
    /// Suites to offer, in preference order. `None` offers everything the
    /// protocol family supports.
    pub cipher_suites: Option<Vec<u16>>,
    /// Offer a cached session id for the host, when one exists.
    pub resume_sessions: bool,
    /// Answer a post-handshake HelloRequest with a new handshake. Disable
    /// to answer with a NoRenegotiation warning instead.
    pub renegotiate: bool,
}

impl ClientConfig {
    pub fn new(key_extractor: KeyExtractor) -> ClientConfig {
        ClientConfig {
            protocol: SecurityProtocol::Default,
            key_extractor,
            identity: None,
            cipher_suites: None,
            resume_sessions: true,
            renegotiate: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientState {
    Start,
    AwaitServerHello,
    AwaitServerHelloDone,
    AwaitChangeCipherSpec,
    AwaitFinished,
    Complete,
}

pub struct ClientSession<S: Transport> {
    pub record: RecordProtocol<S>,
    config: ClientConfig,
    buffer: HandshakeBuffer,
    state: ClientState,
    offered_session: Vec<u8>,
    server_public_key: Option<RsaPublicKey>,
    certificate_requested: bool,
}

impl<S: Transport> ClientSession<S> {
    pub fn new(transport: S, config: ClientConfig, host: &str) -> ClientSession<S> {
        let ctx = Context::new(ConnectionEnd::Client, config.protocol, host);
        ClientSession {
            record: RecordProtocol::new(transport, ctx),
            config,
            buffer: HandshakeBuffer::new(),
            state: ClientState::Start,
            offered_session: Vec::new(),
            server_public_key: None,
            certificate_requested: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ClientState::Complete
    }

    pub fn renegotiate_on_hello_request(&self) -> bool {
        self.config.renegotiate
    }

    /// Drive the handshake to completion. On failure the mapped alert is
    /// sent best-effort before the error surfaces.
    pub fn handshake(&mut self) -> Result<(), TlsError> {
        match self.run() {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some((level, description)) = err.alert() {
                    let _ = self
                        .record
                        .send_alert(crate::alert::Alert::new(level, description));
                }
                Err(err)
            }
        }
    }

    fn run(&mut self) -> Result<(), TlsError> {
        self.state = ClientState::Start;
        self.buffer = HandshakeBuffer::new();
        self.server_public_key = None;
        self.certificate_requested = false;
        self.record.ctx.clear_transcript();
        self.record.ctx.handshake_state = HandshakeState::Started;

        self.send_client_hello()?;
        while self.state != ClientState::Complete {
            let event = self.record.read_record()?;
            self.advance(event)?;
        }
        self.record.ctx.handshake_state = HandshakeState::Finished;
        self.record.ctx.clear_transcript();
        info!(
            "client handshake complete, suite {}, resumed {}",
            self.record.ctx.negotiated_suite_name(),
            self.record.ctx.resumed
        );
        Ok(())
    }

    /// Advance the state machine by one record event. The blocking driver
    /// above calls this per read; a completion-based caller can feed events
    /// in as they arrive.
    pub fn advance(&mut self, event: RecordEvent) -> Result<(), TlsError> {
        match event {
            RecordEvent::Handshake(payload) => {
                self.buffer.push(&payload);
                while let Some(frame) = self.buffer.next_frame()? {
                    self.on_frame(frame)?;
                }
                Ok(())
            }
            RecordEvent::ChangeCipherSpec => {
                if self.state != ClientState::AwaitChangeCipherSpec {
                    return Err(TlsError::UnexpectedMessage("change cipher spec"));
                }
                self.state = ClientState::AwaitFinished;
                Ok(())
            }
            RecordEvent::Warning(desc) => {
                debug!("ignoring warning alert {:?} during handshake", desc);
                Ok(())
            }
            RecordEvent::ApplicationData(_) => {
                Err(TlsError::UnexpectedMessage("application data in handshake"))
            }
            RecordEvent::LegacyHandshake(_) => {
                Err(TlsError::UnexpectedMessage("legacy hello from server"))
            }
            RecordEvent::Closed => Err(TlsError::ConnectionClosed),
        }
    }

    fn send_handshake(&mut self, kind: HandshakeType, body: &[u8]) -> Result<(), TlsError> {
        let wire = frame(kind, body);
        self.record.ctx.update_transcript(&wire);
        self.record.send_record(ContentType::Handshake, &wire)
    }

    fn send_client_hello(&mut self) -> Result<(), TlsError> {
        let ctx = &mut self.record.ctx;
        ctx.client_random = ctx.new_random()?;
        self.offered_session = if self.config.resume_sessions {
            session::id_for_host(&ctx.host).unwrap_or_default()
        } else {
            Vec::new()
        };
        let mut offered = ctx.supported_suites().codes();
        if let Some(chosen) = &self.config.cipher_suites {
            offered = chosen.clone();
            for code in &offered {
                ctx.supported_suites().by_code(*code)?;
            }
        }
        let hello = ClientHello {
            version: ctx.protocol.version(),
            random: ctx.client_random,
            session_id: self.offered_session.clone(),
            cipher_suites: offered,
            compression_methods: vec![NULL_COMPRESSION],
        };
        let body = hello.to_bytes();
        self.state = ClientState::AwaitServerHello;
        self.send_handshake(HandshakeType::ClientHello, &body)
    }

    fn on_frame(&mut self, frame: Frame) -> Result<(), TlsError> {
        match (self.state, frame.kind) {
            // A HelloRequest during a running handshake draws a warning
            // and does not disturb the state machine.
            (_, HandshakeType::HelloRequest) => {
                self.record.send_alert(crate::alert::Alert::new(
                    crate::alert::AlertLevel::Warning,
                    crate::alert::AlertDescription::NoRenegotiation,
                ))
            }
            (ClientState::AwaitServerHello, HandshakeType::ServerHello) => {
                self.on_server_hello(frame)
            }
            (ClientState::AwaitServerHelloDone, HandshakeType::Certificate) => {
                self.on_certificate(frame)
            }
            (ClientState::AwaitServerHelloDone, HandshakeType::CertificateRequest) => {
                self.on_certificate_request(frame)
            }
            (ClientState::AwaitServerHelloDone, HandshakeType::ServerHelloDone) => {
                self.on_server_hello_done(frame)
            }
            (ClientState::AwaitFinished, HandshakeType::Finished) => self.on_finished(frame),
            (_, HandshakeType::ServerKeyExchange) => {
                Err(TlsError::UnexpectedMessage("server key exchange"))
            }
            _ => Err(TlsError::UnexpectedMessage("handshake message out of order")),
        }
    }

    fn on_server_hello(&mut self, frame: Frame) -> Result<(), TlsError> {
        let hello = ServerHello::unpack(&mut Reader::init(&frame.body))?;
        let ctx = &mut self.record.ctx;
        ctx.change_protocol(hello.version.code())?;
        if hello.compression_method != NULL_COMPRESSION {
            return Err(TlsError::HandshakeFailure("unsupported compression"));
        }
        let info = ctx.supported_suites().by_code(hello.cipher_suite)?;
        ctx.server_random = hello.random;
        ctx.set_negotiating_suite(info);
        ctx.update_transcript(&frame.raw);
        debug!("server selected suite {}", info.name);

        let resumed = !self.offered_session.is_empty() && hello.session_id == self.offered_session;
        ctx.session_id = hello.session_id;
        if resumed {
            if !session::set_context_from_cache(ctx) {
                return Err(TlsError::HandshakeFailure("stale resumption offer"));
            }
            ctx.resumed = true;
            crypto::compute_keys(ctx)?;
            ctx.initialize_negotiating_cipher()?;
            // Abbreviated handshake: the server's ChangeCipherSpec and
            // Finished come next.
            self.state = ClientState::AwaitChangeCipherSpec;
        } else {
            self.state = ClientState::AwaitServerHelloDone;
        }
        Ok(())
    }

    fn on_certificate(&mut self, frame: Frame) -> Result<(), TlsError> {
        let certificate = Certificate::unpack(&mut Reader::init(&frame.body))?;
        let leaf = certificate
            .chain
            .first()
            .ok_or(TlsError::HandshakeFailure("empty server certificate"))?;
        self.server_public_key = Some((self.config.key_extractor)(leaf)?);
        self.record.ctx.update_transcript(&frame.raw);
        Ok(())
    }

    fn on_certificate_request(&mut self, frame: Frame) -> Result<(), TlsError> {
        crate::messages::CertificateRequest::unpack(&mut Reader::init(&frame.body))?;
        self.certificate_requested = true;
        self.record.ctx.update_transcript(&frame.raw);
        Ok(())
    }

    fn on_server_hello_done(&mut self, frame: Frame) -> Result<(), TlsError> {
        ServerHelloDone::unpack(&mut Reader::init(&frame.body))?;
        self.record.ctx.update_transcript(&frame.raw);

        if self.certificate_requested {
            let chain = self
                .config
                .identity
                .as_ref()
                .map(|id| id.chain.clone())
                .unwrap_or_default();
            let body = Certificate { chain }.to_bytes();
            self.send_handshake(HandshakeType::Certificate, &body)?;
        }

        // Pre-master secret: offered version then 46 random bytes, RSA
        // encrypted under the server key.
        let server_key = self
            .server_public_key
            .clone()
            .ok_or(TlsError::HandshakeFailure("server sent no certificate"))?;
        let mut pre_master = Vec::with_capacity(PRE_MASTER_SECRET_LEN);
        let offered = self.record.ctx.protocol.version();
        pre_master.push(offered.major);
        pre_master.push(offered.minor);
        pre_master.extend_from_slice(
            &self
                .record
                .ctx
                .get_secure_random_bytes(PRE_MASTER_SECRET_LEN - 2)?,
        );
        let padding = self
            .record
            .ctx
            .get_secure_random_bytes(server_key.modulus_len())?;
        let encrypted = server_key.encrypt(&pre_master, &padding)?;

        let family = self.record.ctx.protocol;
        let body = ClientKeyExchange {
            encrypted_pre_master: encrypted,
        }
        .to_bytes(family);
        self.send_handshake(HandshakeType::ClientKeyExchange, &body)?;

        crypto::compute_master_secret(&mut self.record.ctx, &pre_master)?;
        crypto::zero(&mut pre_master);
        crypto::compute_keys(&mut self.record.ctx)?;
        self.record.ctx.initialize_negotiating_cipher()?;

        if self.certificate_requested {
            if let Some(identity) = self.config.identity.clone() {
                let ctx = &self.record.ctx;
                let digest = ctx
                    .negotiating_variant()?
                    .certificate_verify_digest(ctx.master_secret(), ctx.transcript())?;
                let signature = identity.key.sign(&digest)?;
                let body = CertificateVerify { signature }.to_bytes();
                self.send_handshake(HandshakeType::CertificateVerify, &body)?;
            }
        }

        self.record.send_change_cipher_spec()?;
        self.send_finished()?;
        self.state = ClientState::AwaitChangeCipherSpec;
        Ok(())
    }

    fn send_finished(&mut self) -> Result<(), TlsError> {
        let ctx = &self.record.ctx;
        let verify_data = ctx.write_variant()?.finished_verify_data(
            ctx.master_secret(),
            ctx.transcript(),
            ConnectionEnd::Client,
        )?;
        let body = Finished { verify_data }.to_bytes();
        self.send_handshake(HandshakeType::Finished, &body)
    }

    fn on_finished(&mut self, frame: Frame) -> Result<(), TlsError> {
        let finished = Finished::unpack(&mut Reader::init(&frame.body))?;
        let expected = {
            let ctx = &self.record.ctx;
            ctx.read_variant()?.finished_verify_data(
                ctx.master_secret(),
                ctx.transcript(),
                ConnectionEnd::Server,
            )?
        };
        constant_time::verify_slices_are_equal(&finished.verify_data, &expected)
            .map_err(|_| TlsError::HandshakeFailure("finished verify data mismatch"))?;
        self.record.ctx.update_transcript(&frame.raw);

        if self.record.ctx.resumed {
            // Abbreviated handshake: our ChangeCipherSpec and Finished
            // answer the server's.
            self.record.send_change_cipher_spec()?;
            self.send_finished()?;
        }
        self.state = ClientState::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDescription;
    use crate::transport::pipe;

    fn extractor() -> KeyExtractor {
        Arc::new(|_| Err(TlsError::Decode("unused")))
    }

    #[test]
    fn renegotiation_is_accepted_by_default() {
        assert!(ClientConfig::new(extractor()).renegotiate);
    }

    #[test]
    fn hello_request_mid_handshake_draws_a_warning() {
        let (a, b) = pipe();
        let mut session = ClientSession::new(a, ClientConfig::new(extractor()), "test");
        let mut peer = RecordProtocol::new(
            b,
            Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, ""),
        );

        session.state = ClientState::AwaitServerHello;
        let wire = frame(HandshakeType::HelloRequest, &[]);
        session
            .advance(RecordEvent::Handshake(wire))
            .expect("advance");
        // The running handshake is left where it was.
        assert_eq!(session.state, ClientState::AwaitServerHello);

        match peer.read_record().expect("read") {
            RecordEvent::Warning(desc) => assert_eq!(desc, AlertDescription::NoRenegotiation),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
