//! Per-connection security context: negotiated parameters, key material,
//! sequence numbers and the running handshake transcript.
//!
//! Cipher parameters live in a two-slot pool. Four roles index into it:
//! `current` and `negotiating` name the generations, `read` and `write`
//! name what each direction is protected with right now. A ChangeCipherSpec
//! moves one direction onto the negotiating generation; when both
//! directions have moved, the generations swap and the retired slot is
//! wiped.

use crate::cipher::{SuiteCollection, SuiteInfo};
use crate::crypto::{self, CipherSuite, ConnectionEnd, SuiteVariant, WriteKeys};
use crate::errors::TlsError;
use crate::protocol::{ProtocolVersion, SecurityProtocol};

use byteorder::{BigEndian, ByteOrder};
use ring::rand::{SecureRandom, SystemRandom};

pub const RANDOM_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    None,
    Started,
    Finished,
}

/// One generation of negotiated parameters.
#[derive(Default)]
pub struct SecurityParameters {
    pub suite: Option<CipherSuite>,
    pub client_write_mac_secret: Vec<u8>,
    pub server_write_mac_secret: Vec<u8>,
}

impl SecurityParameters {
    fn is_ready(&self) -> bool {
        self.suite.as_ref().map_or(false, |s| s.is_initialized())
    }

    pub fn clear(&mut self) {
        self.suite = None;
        crypto::zero(&mut self.client_write_mac_secret);
        crypto::zero(&mut self.server_write_mac_secret);
        self.client_write_mac_secret.clear();
        self.server_write_mac_secret.clear();
    }
}

pub struct Context {
    pub entity: ConnectionEnd,
    pub protocol: SecurityProtocol,
    /// Negotiated wire version; starts at the family's own version.
    pub version: ProtocolVersion,
    pub host: String,
    pub session_id: Vec<u8>,
    pub client_random: [u8; RANDOM_LEN],
    pub server_random: [u8; RANDOM_LEN],
    pub master_secret: Vec<u8>,
    pub handshake_state: HandshakeState,
    pub resumed: bool,
    /// Set when a CloseNotify arrived; no further reads will succeed.
    pub receive_ended: bool,

    suites: SuiteCollection,
    parameters: [SecurityParameters; 2],
    current: usize,
    negotiating: usize,
    read: usize,
    write: usize,
    keys: WriteKeys,
    read_sequence: u64,
    write_sequence: u64,
    transcript: Vec<u8>,
    rng: SystemRandom,
}

impl Context {
    pub fn new(entity: ConnectionEnd, protocol: SecurityProtocol, host: &str) -> Context {
        let protocol = protocol.resolve();
        Context {
            entity,
            protocol,
            version: protocol.version(),
            host: host.to_owned(),
            session_id: Vec::new(),
            client_random: [0; RANDOM_LEN],
            server_random: [0; RANDOM_LEN],
            master_secret: Vec::new(),
            handshake_state: HandshakeState::None,
            resumed: false,
            receive_ended: false,
            suites: SuiteCollection::new(protocol),
            parameters: [SecurityParameters::default(), SecurityParameters::default()],
            current: 0,
            negotiating: 1,
            read: 0,
            write: 0,
            keys: WriteKeys::default(),
            read_sequence: 0,
            write_sequence: 0,
            transcript: Vec::new(),
            rng: SystemRandom::new(),
        }
    }

    pub fn supported_suites(&self) -> &SuiteCollection {
        &self.suites
    }

    /// Accept the peer's version field, which must match the requested
    /// family exactly. There is no downgrade between families.
    pub fn change_protocol(&mut self, code: u16) -> Result<(), TlsError> {
        if !self.protocol.permits(code) {
            return Err(TlsError::UnsupportedProtocol(code));
        }
        self.version = ProtocolVersion::from_code(code)?;
        Ok(())
    }

    pub fn get_secure_random_bytes(&self, len: usize) -> Result<Vec<u8>, TlsError> {
        let mut out = vec![0u8; len];
        self.rng
            .fill(&mut out)
            .map_err(|_| TlsError::RandomSource)?;
        // PKCS#1 padding requires nonzero bytes; keep the guarantee for
        // every caller.
        for byte in out.iter_mut() {
            while *byte == 0 {
                let mut one = [0u8; 1];
                self.rng.fill(&mut one).map_err(|_| TlsError::RandomSource)?;
                *byte = one[0];
            }
        }
        Ok(out)
    }

    /// 32-byte hello random: gmt_unix_time then 28 random bytes.
    pub fn new_random(&self) -> Result<[u8; RANDOM_LEN], TlsError> {
        let mut random = [0u8; RANDOM_LEN];
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        BigEndian::write_u32(&mut random[..4], now);
        let tail = self.get_secure_random_bytes(RANDOM_LEN - 4)?;
        random[4..].copy_from_slice(&tail);
        Ok(random)
    }

    // --- negotiating generation -----------------------------------------

    pub fn set_negotiating_suite(&mut self, info: &'static SuiteInfo) {
        let family = self.protocol;
        self.parameters[self.negotiating].suite = Some(CipherSuite::new(info, family));
    }

    pub fn negotiating_suite_info(&self) -> Result<&'static SuiteInfo, TlsError> {
        self.parameters[self.negotiating]
            .suite
            .as_ref()
            .map(|s| s.info)
            .ok_or(TlsError::HandshakeFailure("no cipher suite negotiated"))
    }

    pub fn negotiating_variant(&self) -> Result<&'static dyn SuiteVariant, TlsError> {
        self.parameters[self.negotiating]
            .suite
            .as_ref()
            .map(|s| s.variant())
            .ok_or(TlsError::HandshakeFailure("no cipher suite negotiated"))
    }

    pub fn set_master_secret(&mut self, master: &[u8]) {
        crypto::zero(&mut self.master_secret);
        self.master_secret = master.to_vec();
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn install_negotiating_secrets(
        &mut self,
        client_write_mac_secret: Vec<u8>,
        server_write_mac_secret: Vec<u8>,
        keys: WriteKeys,
    ) {
        let params = &mut self.parameters[self.negotiating];
        params.client_write_mac_secret = client_write_mac_secret;
        params.server_write_mac_secret = server_write_mac_secret;
        self.keys.clear();
        self.keys = keys;
    }

    /// Build the per-direction transforms from the derived write keys.
    pub fn initialize_negotiating_cipher(&mut self) -> Result<(), TlsError> {
        let entity = self.entity;
        let keys = &self.keys;
        let suite = self.parameters[self.negotiating]
            .suite
            .as_mut()
            .ok_or(TlsError::HandshakeFailure("no cipher suite negotiated"))?;
        suite.initialize_cipher(entity, keys);
        Ok(())
    }

    pub fn negotiated_suite_name(&self) -> &'static str {
        self.parameters[self.current]
            .suite
            .as_ref()
            .map(|s| s.info.name)
            .unwrap_or("none")
    }

    /// Variant of the generation protecting incoming records; valid once
    /// the peer's ChangeCipherSpec has been processed.
    pub fn read_variant(&self) -> Result<&'static dyn SuiteVariant, TlsError> {
        self.parameters[self.read]
            .suite
            .as_ref()
            .map(|s| s.variant())
            .ok_or(TlsError::Crypto("no active read cipher"))
    }

    /// Variant of the generation protecting outgoing records.
    pub fn write_variant(&self) -> Result<&'static dyn SuiteVariant, TlsError> {
        self.parameters[self.write]
            .suite
            .as_ref()
            .map(|s| s.variant())
            .ok_or(TlsError::Crypto("no active write cipher"))
    }

    // --- switch-over ----------------------------------------------------

    /// Our ChangeCipherSpec went out: outgoing records now use the
    /// negotiating generation, starting at sequence zero.
    pub fn switch_write_cipher(&mut self) -> Result<(), TlsError> {
        if !self.parameters[self.negotiating].is_ready() {
            return Err(TlsError::HandshakeFailure("cipher switch before key setup"));
        }
        self.write = self.negotiating;
        self.write_sequence = 0;
        self.finish_switch_if_complete();
        Ok(())
    }

    /// The peer's ChangeCipherSpec arrived: incoming records now use the
    /// negotiating generation, starting at sequence zero.
    pub fn switch_read_cipher(&mut self) -> Result<(), TlsError> {
        if !self.parameters[self.negotiating].is_ready() {
            return Err(TlsError::UnexpectedMessage("change cipher spec before key setup"));
        }
        self.read = self.negotiating;
        self.read_sequence = 0;
        self.finish_switch_if_complete();
        Ok(())
    }

    fn finish_switch_if_complete(&mut self) {
        if self.read == self.negotiating && self.write == self.negotiating {
            let retired = self.current;
            self.current = self.negotiating;
            self.negotiating = retired;
            self.parameters[self.negotiating].clear();
        }
    }

    // --- record protection ----------------------------------------------

    pub fn write_cipher_active(&self) -> bool {
        self.parameters[self.write].is_ready()
    }

    pub fn read_cipher_active(&self) -> bool {
        self.parameters[self.read].is_ready()
    }

    /// MAC for an outgoing record under the write generation. Does not
    /// advance the sequence number.
    pub fn write_mac(&self, content_type: u8, fragment: &[u8]) -> Result<Vec<u8>, TlsError> {
        let params = &self.parameters[self.write];
        let suite = params
            .suite
            .as_ref()
            .ok_or(TlsError::Crypto("no active write cipher"))?;
        let secret = match self.entity {
            ConnectionEnd::Client => &params.client_write_mac_secret,
            ConnectionEnd::Server => &params.server_write_mac_secret,
        };
        suite.variant().record_mac(
            suite.info.hash,
            secret,
            self.write_sequence,
            content_type,
            self.version,
            fragment,
        )
    }

    /// Expected MAC for an incoming record under the read generation.
    pub fn read_mac(&self, content_type: u8, fragment: &[u8]) -> Result<Vec<u8>, TlsError> {
        let params = &self.parameters[self.read];
        let suite = params
            .suite
            .as_ref()
            .ok_or(TlsError::Crypto("no active read cipher"))?;
        let secret = match self.entity {
            ConnectionEnd::Client => &params.server_write_mac_secret,
            ConnectionEnd::Server => &params.client_write_mac_secret,
        };
        suite.variant().record_mac(
            suite.info.hash,
            secret,
            self.read_sequence,
            content_type,
            self.version,
            fragment,
        )
    }

    pub fn write_suite_mut(&mut self) -> Result<&mut CipherSuite, TlsError> {
        self.parameters[self.write]
            .suite
            .as_mut()
            .ok_or(TlsError::Crypto("no active write cipher"))
    }

    pub fn read_suite_mut(&mut self) -> Result<&mut CipherSuite, TlsError> {
        self.parameters[self.read]
            .suite
            .as_mut()
            .ok_or(TlsError::Crypto("no active read cipher"))
    }

    pub fn advance_write_sequence(&mut self) {
        self.write_sequence = self.write_sequence.wrapping_add(1);
    }

    pub fn advance_read_sequence(&mut self) {
        self.read_sequence = self.read_sequence.wrapping_add(1);
    }

    pub fn write_sequence(&self) -> u64 {
        self.write_sequence
    }

    pub fn read_sequence(&self) -> u64 {
        self.read_sequence
    }

    // --- handshake transcript -------------------------------------------

    pub fn update_transcript(&mut self, message: &[u8]) {
        self.transcript.extend_from_slice(message);
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    /// Wipe every secret this context holds and reset all negotiation
    /// state, as for a fresh connection.
    pub fn clear(&mut self) {
        crypto::zero(&mut self.master_secret);
        self.master_secret.clear();
        self.keys.clear();
        for params in self.parameters.iter_mut() {
            params.clear();
        }
        self.transcript.clear();

        self.session_id.clear();
        self.client_random = [0; RANDOM_LEN];
        self.server_random = [0; RANDOM_LEN];
        self.handshake_state = HandshakeState::None;
        self.resumed = false;
        self.version = self.protocol.version();
        self.current = 0;
        self.negotiating = 1;
        self.read = 0;
        self.write = 0;
        self.read_sequence = 0;
        self.write_sequence = 0;
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::TLS_RSA_WITH_AES_128_CBC_SHA;
    use crate::crypto;

    fn ready_context(entity: ConnectionEnd) -> Context {
        let mut ctx = Context::new(entity, SecurityProtocol::Tls1, "localhost");
        ctx.client_random = [1; RANDOM_LEN];
        ctx.server_random = [2; RANDOM_LEN];
        let info = ctx
            .supported_suites()
            .by_code(TLS_RSA_WITH_AES_128_CBC_SHA)
            .expect("suite");
        ctx.set_negotiating_suite(info);
        crypto::compute_master_secret(&mut ctx, &[3; 48]).expect("master secret");
        crypto::compute_keys(&mut ctx).expect("keys");
        ctx.initialize_negotiating_cipher().expect("cipher init");
        ctx
    }

    #[test]
    fn random_bytes_are_nonzero() {
        let ctx = Context::new(ConnectionEnd::Client, SecurityProtocol::Default, "");
        let bytes = ctx.get_secure_random_bytes(64).expect("random");
        assert_eq!(bytes.len(), 64);
        assert!(bytes.iter().all(|b| *b != 0));
    }

    #[test]
    fn switch_is_per_direction_until_both_moved() {
        let mut ctx = ready_context(ConnectionEnd::Client);
        assert!(!ctx.write_cipher_active());
        assert!(!ctx.read_cipher_active());

        ctx.switch_write_cipher().expect("write switch");
        assert!(ctx.write_cipher_active());
        assert!(!ctx.read_cipher_active());

        ctx.switch_read_cipher().expect("read switch");
        assert!(ctx.write_cipher_active());
        assert!(ctx.read_cipher_active());
    }

    #[test]
    fn switch_without_keys_is_rejected() {
        let mut ctx = Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, "");
        assert!(ctx.switch_read_cipher().is_err());
        assert!(ctx.switch_write_cipher().is_err());
    }

    #[test]
    fn sequences_reset_on_switch() {
        let mut ctx = ready_context(ConnectionEnd::Client);
        ctx.advance_write_sequence();
        ctx.advance_write_sequence();
        assert_eq!(ctx.write_sequence(), 2);
        ctx.switch_write_cipher().expect("switch");
        assert_eq!(ctx.write_sequence(), 0);
    }

    #[test]
    fn client_write_mac_matches_server_read_mac() {
        let mut client = ready_context(ConnectionEnd::Client);
        let mut server = ready_context(ConnectionEnd::Server);
        client.switch_write_cipher().expect("switch");
        client.switch_read_cipher().expect("switch");
        server.switch_write_cipher().expect("switch");
        server.switch_read_cipher().expect("switch");

        let sent = client.write_mac(23, b"payload").expect("client mac");
        let expected = server.read_mac(23, b"payload").expect("server mac");
        assert_eq!(sent, expected);
        // And not the other direction's secret.
        let reverse = server.write_mac(23, b"payload").expect("server write mac");
        assert_ne!(sent, reverse);
    }

    #[test]
    fn clear_resets_negotiation_state() {
        let mut ctx = ready_context(ConnectionEnd::Client);
        ctx.session_id = vec![7; 32];
        ctx.handshake_state = HandshakeState::Finished;
        ctx.switch_write_cipher().expect("switch");
        ctx.advance_write_sequence();

        ctx.clear();
        assert!(ctx.master_secret.is_empty());
        assert!(ctx.session_id.is_empty());
        assert_eq!(ctx.handshake_state, HandshakeState::None);
        assert_eq!(ctx.client_random, [0; RANDOM_LEN]);
        assert!(!ctx.write_cipher_active());
        assert_eq!(ctx.write_sequence(), 0);
    }

    #[test]
    fn foreign_version_code_is_rejected() {
        let mut ctx = Context::new(ConnectionEnd::Client, SecurityProtocol::Tls1, "");
        assert!(ctx.change_protocol(0x0300).is_err());
        assert!(ctx.change_protocol(0x0301).is_ok());
    }
}
