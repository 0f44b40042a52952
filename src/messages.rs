//! Wire codecs for the handshake message bodies. These are pure codecs;
//! the state machines in `client` and `server` decide what to do with
//! them.

use crate::context::RANDOM_LEN;
use crate::errors::TlsError;
use crate::pack::{
    put_opaque16, put_opaque8, put_u16, put_u24, take_opaque16, take_opaque8, Pack, Reader,
};
use crate::protocol::{ProtocolVersion, SecurityProtocol};

pub const NULL_COMPRESSION: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
}

impl Pack for ClientHello {
    fn pack(&self, out: &mut Vec<u8>) {
        self.version.pack(out);
        out.extend_from_slice(&self.random);
        put_opaque8(out, &self.session_id);
        put_u16(out, (self.cipher_suites.len() * 2) as u16);
        for code in &self.cipher_suites {
            put_u16(out, *code);
        }
        put_opaque8(out, &self.compression_methods);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let version = ProtocolVersion::unpack(r)?;
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(r.take(RANDOM_LEN)?);
        let session_id = take_opaque8(r)?.to_vec();
        if session_id.len() > 32 {
            return Err(TlsError::Decode("session id length"));
        }
        let suites_bytes = take_opaque16(r)?;
        if suites_bytes.len() % 2 != 0 || suites_bytes.is_empty() {
            return Err(TlsError::Decode("cipher suite list"));
        }
        let cipher_suites = suites_bytes
            .chunks(2)
            .map(|c| (u16::from(c[0]) << 8) | u16::from(c[1]))
            .collect();
        let compression_methods = take_opaque8(r)?.to_vec();
        if compression_methods.is_empty() {
            return Err(TlsError::Decode("compression methods"));
        }
        Ok(ClientHello {
            version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
        })
    }
}

impl ClientHello {
    /// Decode the body of an SSLv2-framed ClientHello (bytes starting at
    /// the legacy message type). Only three-byte cipher specs whose first
    /// byte is zero map onto real suite codes; the challenge right-aligns
    /// into the 32-byte random.
    pub fn from_v2(body: &[u8]) -> Result<ClientHello, TlsError> {
        let mut r = Reader::init(body);
        if r.take_u8()? != 1 {
            return Err(TlsError::Decode("legacy hello type"));
        }
        let version = ProtocolVersion::unpack(&mut r)?;
        let specs_len = r.take_u16()? as usize;
        let session_len = r.take_u16()? as usize;
        let challenge_len = r.take_u16()? as usize;
        if specs_len % 3 != 0 || challenge_len > RANDOM_LEN || challenge_len == 0 {
            return Err(TlsError::Decode("legacy hello lengths"));
        }
        let specs = r.take(specs_len)?;
        let session_id = r.take(session_len)?.to_vec();
        let challenge = r.take(challenge_len)?;

        let cipher_suites = specs
            .chunks(3)
            .filter(|c| c[0] == 0)
            .map(|c| (u16::from(c[1]) << 8) | u16::from(c[2]))
            .collect::<Vec<u16>>();
        if cipher_suites.is_empty() {
            return Err(TlsError::Decode("legacy cipher specs"));
        }

        let mut random = [0u8; RANDOM_LEN];
        random[RANDOM_LEN - challenge_len..].copy_from_slice(challenge);

        Ok(ClientHello {
            version,
            random,
            session_id,
            cipher_suites,
            compression_methods: vec![NULL_COMPRESSION],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
}

impl Pack for ServerHello {
    fn pack(&self, out: &mut Vec<u8>) {
        self.version.pack(out);
        out.extend_from_slice(&self.random);
        put_opaque8(out, &self.session_id);
        put_u16(out, self.cipher_suite);
        out.push(self.compression_method);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let version = ProtocolVersion::unpack(r)?;
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(r.take(RANDOM_LEN)?);
        let session_id = take_opaque8(r)?.to_vec();
        if session_id.len() > 32 {
            return Err(TlsError::Decode("session id length"));
        }
        let cipher_suite = r.take_u16()?;
        let compression_method = r.take_u8()?;
        Ok(ServerHello {
            version,
            random,
            session_id,
            cipher_suite,
            compression_method,
        })
    }
}

/// A certificate chain, leaf first, each certificate in DER.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub chain: Vec<Vec<u8>>,
}

impl Pack for Certificate {
    fn pack(&self, out: &mut Vec<u8>) {
        let total: usize = self.chain.iter().map(|c| 3 + c.len()).sum();
        put_u24(out, total as u32);
        for cert in &self.chain {
            put_u24(out, cert.len() as u32);
            out.extend_from_slice(cert);
        }
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let total = r.take_u24()? as usize;
        let mut list = r.slice(total)?;
        let mut chain = Vec::new();
        while !list.is_empty() {
            let len = list.take_u24()? as usize;
            chain.push(list.take(len)?.to_vec());
        }
        Ok(Certificate { chain })
    }
}

pub const CERT_TYPE_RSA_SIGN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    /// DER-encoded distinguished names of acceptable authorities.
    pub authorities: Vec<Vec<u8>>,
}

impl Pack for CertificateRequest {
    fn pack(&self, out: &mut Vec<u8>) {
        put_opaque8(out, &self.certificate_types);
        let total: usize = self.authorities.iter().map(|a| 2 + a.len()).sum();
        put_u16(out, total as u16);
        for name in &self.authorities {
            put_opaque16(out, name);
        }
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let certificate_types = take_opaque8(r)?.to_vec();
        let total = r.take_u16()? as usize;
        let mut list = r.slice(total)?;
        let mut authorities = Vec::new();
        while !list.is_empty() {
            authorities.push(take_opaque16(&mut list)?.to_vec());
        }
        Ok(CertificateRequest {
            certificate_types,
            authorities,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloDone;

impl Pack for ServerHelloDone {
    fn pack(&self, _out: &mut Vec<u8>) {}

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        if !r.is_empty() {
            return Err(TlsError::Decode("server hello done body"));
        }
        Ok(ServerHelloDone)
    }
}

/// The RSA-encrypted pre-master secret. TLS prefixes it with a two-byte
/// length; SSL3 sends the bare ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub encrypted_pre_master: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn pack(&self, family: SecurityProtocol, out: &mut Vec<u8>) {
        match family.resolve() {
            SecurityProtocol::Ssl3 => out.extend_from_slice(&self.encrypted_pre_master),
            _ => put_opaque16(out, &self.encrypted_pre_master),
        }
    }

    pub fn to_bytes(&self, family: SecurityProtocol) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack(family, &mut out);
        out
    }

    pub fn unpack(family: SecurityProtocol, r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let encrypted_pre_master = match family.resolve() {
            SecurityProtocol::Ssl3 => r.rest().to_vec(),
            _ => take_opaque16(r)?.to_vec(),
        };
        if encrypted_pre_master.is_empty() {
            return Err(TlsError::Decode("client key exchange body"));
        }
        Ok(ClientKeyExchange {
            encrypted_pre_master,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signature: Vec<u8>,
}

impl Pack for CertificateVerify {
    fn pack(&self, out: &mut Vec<u8>) {
        put_opaque16(out, &self.signature);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        Ok(CertificateVerify {
            signature: take_opaque16(r)?.to_vec(),
        })
    }
}

/// Finished carries the bare verify data: 12 bytes under TLS, 36 under
/// SSL3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Pack for Finished {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.verify_data);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let verify_data = r.rest().to_vec();
        if verify_data.len() != 12 && verify_data.len() != 36 {
            return Err(TlsError::Decode("finished length"));
        }
        Ok(Finished { verify_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TLS1;

    #[test]
    fn client_hello_round_trips() {
        let hello = ClientHello {
            version: TLS1,
            random: [7; RANDOM_LEN],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![0x0005, 0x002f],
            compression_methods: vec![NULL_COMPRESSION],
        };
        let bytes = hello.to_bytes();
        let parsed = ClientHello::unpack(&mut Reader::init(&bytes)).expect("unpack");
        assert_eq!(parsed, hello);
    }

    #[test]
    fn client_hello_layout_is_fixed() {
        let hello = ClientHello {
            version: TLS1,
            random: [0; RANDOM_LEN],
            session_id: vec![],
            cipher_suites: vec![0x0005],
            compression_methods: vec![NULL_COMPRESSION],
        };
        let bytes = hello.to_bytes();
        // version(2) random(32) sid_len(1) suites_len(2) suites(2) comp_len(1) comp(1)
        assert_eq!(bytes.len(), 2 + 32 + 1 + 2 + 2 + 1 + 1);
        assert_eq!(&bytes[..2], &[3, 1]);
        assert_eq!(&bytes[35..39], &[0, 2, 0, 5]);
    }

    #[test]
    fn v2_hello_maps_specs_and_right_aligns_challenge() {
        let mut body = vec![1u8, 3, 1]; // type, version 3.1
        body.extend_from_slice(&[0, 6]); // cipher specs: 6 bytes
        body.extend_from_slice(&[0, 0]); // no session id
        body.extend_from_slice(&[0, 16]); // 16-byte challenge
        body.extend_from_slice(&[0x07, 0x00, 0xc0]); // v2-only spec, dropped
        body.extend_from_slice(&[0x00, 0x00, 0x05]); // RC4-SHA
        body.extend_from_slice(&[0xaa; 16]);

        let hello = ClientHello::from_v2(&body).expect("decode");
        assert_eq!(hello.cipher_suites, vec![0x0005]);
        assert_eq!(&hello.random[..16], &[0u8; 16]);
        assert_eq!(&hello.random[16..], &[0xaa; 16]);
        assert!(hello.session_id.is_empty());
    }

    #[test]
    fn server_hello_round_trips() {
        let hello = ServerHello {
            version: TLS1,
            random: [9; RANDOM_LEN],
            session_id: vec![5; 32],
            cipher_suite: 0x002f,
            compression_method: NULL_COMPRESSION,
        };
        let bytes = hello.to_bytes();
        let parsed = ServerHello::unpack(&mut Reader::init(&bytes)).expect("unpack");
        assert_eq!(parsed, hello);
    }

    #[test]
    fn certificate_chain_round_trips() {
        let msg = Certificate {
            chain: vec![vec![0xde; 40], vec![0xad; 10]],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 3 + 3 + 40 + 3 + 10);
        let parsed = Certificate::unpack(&mut Reader::init(&bytes)).expect("unpack");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn client_key_exchange_differs_by_family() {
        let cke = ClientKeyExchange {
            encrypted_pre_master: vec![0x55; 64],
        };
        let tls = cke.to_bytes(SecurityProtocol::Tls1);
        assert_eq!(tls.len(), 2 + 64);
        assert_eq!(&tls[..2], &[0, 64]);
        let ssl = cke.to_bytes(SecurityProtocol::Ssl3);
        assert_eq!(ssl.len(), 64);

        let parsed = ClientKeyExchange::unpack(SecurityProtocol::Tls1, &mut Reader::init(&tls))
            .expect("tls unpack");
        assert_eq!(parsed, cke);
        let parsed = ClientKeyExchange::unpack(SecurityProtocol::Ssl3, &mut Reader::init(&ssl))
            .expect("ssl unpack");
        assert_eq!(parsed, cke);
    }

    #[test]
    fn finished_accepts_only_known_lengths() {
        assert!(Finished::unpack(&mut Reader::init(&[0; 12])).is_ok());
        assert!(Finished::unpack(&mut Reader::init(&[0; 36])).is_ok());
        assert!(Finished::unpack(&mut Reader::init(&[0; 20])).is_err());
    }

    #[test]
    fn hello_done_must_be_empty() {
        assert!(ServerHelloDone::unpack(&mut Reader::init(&[])).is_ok());
        assert!(ServerHelloDone::unpack(&mut Reader::init(&[0])).is_err());
    }
}
