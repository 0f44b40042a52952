//! Server side of the handshake.

use crate::client::KeyExtractor;
use crate::context::{Context, HandshakeState};
use crate::crypto::{self, ConnectionEnd, PRE_MASTER_SECRET_LEN};
use crate::errors::TlsError;
use crate::handshake::{frame, Frame, HandshakeBuffer, HandshakeType};
use crate::messages::{
    Certificate, CertificateRequest, CertificateVerify, ClientHello, ClientKeyExchange, Finished,
    ServerHello, ServerHelloDone, CERT_TYPE_RSA_SIGN, NULL_COMPRESSION,
};
use crate::pack::{Pack, Reader};
use crate::protocol::SecurityProtocol;
use crate::record::{ContentType, RecordEvent, RecordProtocol};
use crate::rsa::{RsaPrivateKey, RsaPublicKey};
use crate::session;
use crate::transport::Transport;

use log::{debug, info, warn};
use ring::constant_time;

/// The server's certificate chain and key.
#[derive(Clone)]
pub struct ServerIdentity {
    pub chain: Vec<Vec<u8>>,
    pub key: RsaPrivateKey,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub protocol: SecurityProtocol,
    pub identity: ServerIdentity,
    /// Needed only when client certificates are requested.
    pub key_extractor: Option<KeyExtractor>,
    pub request_client_certificate: bool,
    /// Reject clients that answer a certificate request with an empty
    /// chain.
    pub require_client_certificate: bool,
}

impl ServerConfig {
    pub fn new(identity: ServerIdentity) -> ServerConfig {
        ServerConfig {
            protocol: SecurityProtocol::Default,
            identity,
            key_extractor: None,
            request_client_certificate: false,
            require_client_certificate: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ServerState {
    Start,
    AwaitClientHello,
    AwaitCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitChangeCipherSpec,
    AwaitFinished,
    Complete,
}

pub struct ServerSession<S: Transport> {
    pub record: RecordProtocol<S>,
    config: ServerConfig,
    buffer: HandshakeBuffer,
    state: ServerState,
    client_hello_version: u16,
    client_public_key: Option<RsaPublicKey>,
}

impl<S: Transport> ServerSession<S> {
    pub fn new(transport: S, config: ServerConfig) -> ServerSession<S> {
        let ctx = Context::new(ConnectionEnd::Server, config.protocol, "");
        ServerSession {
            record: RecordProtocol::new(transport, ctx),
            config,
            buffer: HandshakeBuffer::new(),
            state: ServerState::Start,
            client_hello_version: 0,
            client_public_key: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ServerState::Complete
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
        self.state = ServerState::AwaitClientHello;
        self.buffer = HandshakeBuffer::new();
        self.client_public_key = None;
        self.record.ctx.clear_transcript();
        self.record.ctx.handshake_state = HandshakeState::Started;

        while self.state != ServerState::Complete {
            let event = self.record.read_record()?;
            self.advance(event)?;
        }
        self.record.ctx.handshake_state = HandshakeState::Finished;
        self.record.ctx.clear_transcript();
        info!(
            "server handshake complete, suite {}, resumed {}",
            self.record.ctx.negotiated_suite_name(),
            self.record.ctx.resumed
        );
        Ok(())
    }

    /// Advance the state machine by one record event. The blocking driver
    /// above calls this per read; a completion-based caller can feed
    /// events in as they arrive.
    pub fn advance(&mut self, event: RecordEvent) -> Result<(), TlsError> {
        match event {
            RecordEvent::Handshake(payload) => {
                self.buffer.push(&payload);
                while let Some(frame) = self.buffer.next_frame()? {
                    self.on_frame(frame)?;
                }
                Ok(())
            }
            RecordEvent::LegacyHandshake(body) => {
                if self.state != ServerState::AwaitClientHello {
                    return Err(TlsError::UnexpectedMessage("legacy hello mid-handshake"));
                }
                let hello = ClientHello::from_v2(&body)?;
                // The transcript takes the legacy bytes as received,
                // without re-framing.
                self.record.ctx.update_transcript(&body);
                self.on_client_hello(hello)
            }
            RecordEvent::ChangeCipherSpec => {
                if self.state != ServerState::AwaitChangeCipherSpec {
                    return Err(TlsError::UnexpectedMessage("change cipher spec"));
                }
                self.state = ServerState::AwaitFinished;
                Ok(())
            }
            RecordEvent::Warning(desc) => {
                debug!("ignoring warning alert {:?} during handshake", desc);
                Ok(())
            }
            RecordEvent::ApplicationData(_) => {
                Err(TlsError::UnexpectedMessage("application data in handshake"))
            }
            RecordEvent::Closed => Err(TlsError::ConnectionClosed),
        }
    }

    fn send_handshake(&mut self, kind: HandshakeType, body: &[u8]) -> Result<(), TlsError> {
        let wire = frame(kind, body);
        self.record.ctx.update_transcript(&wire);
        self.record.send_record(ContentType::Handshake, &wire)
    }

    fn on_frame(&mut self, frame: Frame) -> Result<(), TlsError> {
        match (self.state, frame.kind) {
            (ServerState::AwaitClientHello, HandshakeType::ClientHello) => {
                let hello = ClientHello::unpack(&mut Reader::init(&frame.body))?;
                self.record.ctx.update_transcript(&frame.raw);
                self.on_client_hello(hello)
            }
            (ServerState::AwaitCertificate, HandshakeType::Certificate) => {
                self.on_certificate(frame)
            }
            (ServerState::AwaitClientKeyExchange, HandshakeType::ClientKeyExchange) => {
                self.on_client_key_exchange(frame)
            }
            (ServerState::AwaitCertificateVerify, HandshakeType::CertificateVerify) => {
                self.on_certificate_verify(frame)
            }
            (ServerState::AwaitFinished, HandshakeType::Finished) => self.on_finished(frame),
            // A CertificateVerify with no preceding Certificate lands
            // here, as does any other misordering.
            _ => Err(TlsError::UnexpectedMessage("handshake message out of order")),
        }
    }

    fn on_client_hello(&mut self, hello: ClientHello) -> Result<(), TlsError> {
        let ctx = &mut self.record.ctx;
        ctx.change_protocol(hello.version.code())?;
        self.client_hello_version = hello.version.code();
        if !hello.compression_methods.contains(&NULL_COMPRESSION) {
            return Err(TlsError::HandshakeFailure("no null compression offered"));
        }
        let info = ctx.supported_suites().select(&hello.cipher_suites)?;
        ctx.client_random = hello.random;
        ctx.server_random = ctx.new_random()?;
        ctx.set_negotiating_suite(info);
        debug!("selected suite {} for client", info.name);

        let resumed = if hello.session_id.is_empty() {
            false
        } else {
            ctx.session_id = hello.session_id.clone();
            session::set_context_from_cache(ctx)
        };

        if resumed {
            ctx.resumed = true;
            self.send_server_hello()?;
            crypto::compute_keys(&mut self.record.ctx)?;
            self.record.ctx.initialize_negotiating_cipher()?;
            // Abbreviated handshake: server switches and finishes first.
            self.record.send_change_cipher_spec()?;
            self.send_finished()?;
            self.state = ServerState::AwaitChangeCipherSpec;
            return Ok(());
        }

        self.record.ctx.session_id = self.record.ctx.get_secure_random_bytes(32)?;
        self.send_server_hello()?;

        let chain = self.config.identity.chain.clone();
        self.send_handshake(HandshakeType::Certificate, &Certificate { chain }.to_bytes())?;

        if self.config.request_client_certificate {
            let request = CertificateRequest {
                certificate_types: vec![CERT_TYPE_RSA_SIGN],
                authorities: Vec::new(),
            };
            self.send_handshake(HandshakeType::CertificateRequest, &request.to_bytes())?;
        }

        self.send_handshake(HandshakeType::ServerHelloDone, &ServerHelloDone.to_bytes())?;
        self.state = if self.config.request_client_certificate {
            ServerState::AwaitCertificate
        } else {
            ServerState::AwaitClientKeyExchange
        };
        Ok(())
    }

    fn send_server_hello(&mut self) -> Result<(), TlsError> {
        let hello = {
            let ctx = &self.record.ctx;
            ServerHello {
                version: ctx.version,
                random: ctx.server_random,
                session_id: ctx.session_id.clone(),
                cipher_suite: ctx.negotiating_suite_info()?.code,
                compression_method: NULL_COMPRESSION,
            }
        };
        self.send_handshake(HandshakeType::ServerHello, &hello.to_bytes())
    }

    fn on_certificate(&mut self, frame: Frame) -> Result<(), TlsError> {
        let certificate = Certificate::unpack(&mut Reader::init(&frame.body))?;
        self.record.ctx.update_transcript(&frame.raw);
        match certificate.chain.first() {
            Some(leaf) => {
                let extractor = self
                    .config
                    .key_extractor
                    .as_ref()
                    .ok_or(TlsError::InvalidArgument("no key extractor configured"))?;
                self.client_public_key = Some(extractor(leaf)?);
            }
            None if self.config.require_client_certificate => {
                return Err(TlsError::HandshakeFailure("client certificate required"));
            }
            None => {
                warn!("client declined certificate request");
            }
        }
        self.state = ServerState::AwaitClientKeyExchange;
        Ok(())
    }

    fn on_client_key_exchange(&mut self, frame: Frame) -> Result<(), TlsError> {
        let family = self.record.ctx.protocol;
        let cke = ClientKeyExchange::unpack(family, &mut Reader::init(&frame.body))?;
        self.record.ctx.update_transcript(&frame.raw);

        // Version-rollback defence: any decryption or format failure is
        // papered over with a random pre-master so the handshake only
        // fails at the Finished check, revealing nothing about why.
        let mut pre_master = match self.config.identity.key.decrypt(&cke.encrypted_pre_master) {
            Ok(pm)
                if pm.len() == PRE_MASTER_SECRET_LEN
                    && ((u16::from(pm[0]) << 8) | u16::from(pm[1])) == self.client_hello_version =>
            {
                pm
            }
            _ => {
                debug!("pre-master rejected, substituting random secret");
                let mut pm = Vec::with_capacity(PRE_MASTER_SECRET_LEN);
                pm.push((self.client_hello_version >> 8) as u8);
                pm.push(self.client_hello_version as u8);
                pm.extend_from_slice(
                    &self
                        .record
                        .ctx
                        .get_secure_random_bytes(PRE_MASTER_SECRET_LEN - 2)?,
                );
                pm
            }
        };

        crypto::compute_master_secret(&mut self.record.ctx, &pre_master)?;
        crypto::zero(&mut pre_master);
        crypto::compute_keys(&mut self.record.ctx)?;
        self.record.ctx.initialize_negotiating_cipher()?;

        self.state = if self.client_public_key.is_some() {
            ServerState::AwaitCertificateVerify
        } else {
            ServerState::AwaitChangeCipherSpec
        };
        Ok(())
    }

    fn on_certificate_verify(&mut self, frame: Frame) -> Result<(), TlsError> {
        let verify = CertificateVerify::unpack(&mut Reader::init(&frame.body))?;
        let key = self
            .client_public_key
            .as_ref()
            .ok_or(TlsError::UnexpectedMessage("certificate verify without certificate"))?;
        let ctx = &self.record.ctx;
        let digest = ctx
            .negotiating_variant()?
            .certificate_verify_digest(ctx.master_secret(), ctx.transcript())?;
        key.verify(&digest, &verify.signature)
            .map_err(|_| TlsError::HandshakeFailure("certificate verify signature"))?;
        self.record.ctx.update_transcript(&frame.raw);
        self.state = ServerState::AwaitChangeCipherSpec;
        Ok(())
    }

    fn send_finished(&mut self) -> Result<(), TlsError> {
        let ctx = &self.record.ctx;
        let verify_data = ctx.write_variant()?.finished_verify_data(
            ctx.master_secret(),
            ctx.transcript(),
            ConnectionEnd::Server,
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
                ConnectionEnd::Client,
            )?
        };
        constant_time::verify_slices_are_equal(&finished.verify_data, &expected)
            .map_err(|_| TlsError::HandshakeFailure("finished verify data mismatch"))?;
        self.record.ctx.update_transcript(&frame.raw);

        if !self.record.ctx.resumed {
            self.record.send_change_cipher_spec()?;
            self.send_finished()?;
        }
        self.state = ServerState::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use crate::transport::pipe;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            chain: vec![vec![0u8; 32]],
            key: RsaPrivateKey::generate(512).expect("keygen"),
        }
    }

    #[test]
    fn certificate_verify_without_certificate_is_fatal() {
        let (_client_end, b) = pipe();
        let mut session = ServerSession::new(b, ServerConfig::new(identity()));

        // No Certificate was received, so no client key is installed.
        session.state = ServerState::AwaitClientKeyExchange;
        let body = CertificateVerify {
            signature: vec![0u8; 64],
        }
        .to_bytes();
        let wire = frame(HandshakeType::CertificateVerify, &body);

        let err = session
            .advance(RecordEvent::Handshake(wire))
            .expect_err("out-of-order certificate verify must be rejected");
        assert!(matches!(err, TlsError::UnexpectedMessage(_)));
        let (level, _) = err.alert().expect("alert expected");
        assert_eq!(level, AlertLevel::Fatal);
    }
}
