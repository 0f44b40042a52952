//! The cipher-suite engine: PRF and key derivation, record MAC for both
//! wire-format eras, and the symmetric record transforms.
//!
//! The two eras share one operation contract (`SuiteVariant`); the variant
//! is selected once when the suite table for the connection is built and
//! never re-examined at run time.

use crate::cipher::{CipherAlgorithm, CipherMode, HashAlgorithm, SuiteInfo};
use crate::context::Context;
use crate::errors::TlsError;
use crate::pack::put_u64;
use crate::protocol::{ProtocolVersion, SecurityProtocol};
use crate::session;

use aes::{Aes128, Aes256};
use block_modes::block_padding::NoPadding;
use block_modes::{BlockMode, Cbc};
use des::{Des, TdesEde3};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

pub const MASTER_SECRET_LEN: usize = 48;
pub const PRE_MASTER_SECRET_LEN: usize = 48;

pub const MASTER_SECRET_LABEL: &[u8] = b"master secret";
pub const KEY_EXPANSION_LABEL: &[u8] = b"key expansion";
pub const CLIENT_FINISHED_LABEL: &[u8] = b"client finished";
pub const SERVER_FINISHED_LABEL: &[u8] = b"server finished";

const SSL3_SENDER_CLIENT: &[u8] = &[0x43, 0x4c, 0x4e, 0x54]; // "CLNT"
const SSL3_SENDER_SERVER: &[u8] = &[0x53, 0x52, 0x56, 0x52]; // "SRVR"

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEnd {
    Client,
    Server,
}

impl ConnectionEnd {
    pub fn is_client(self) -> bool {
        self == ConnectionEnd::Client
    }
}

/// Write keys and IVs sliced from the key block, kept on the `Context`.
#[derive(Clone, Default)]
pub struct WriteKeys {
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl WriteKeys {
    pub fn clear(&mut self) {
        for buf in [
            &mut self.client_write_key,
            &mut self.server_write_key,
            &mut self.client_write_iv,
            &mut self.server_write_iv,
        ]
        .iter_mut()
        {
            zero(buf);
            buf.clear();
        }
    }
}

/// Overwrite key material before releasing it.
pub fn zero(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = 0;
    }
}

macro_rules! hmac_fn {
    ($name:ident, $alg:ty) => {
        fn $name(key: &[u8], chunks: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
            let mut mac = Hmac::<$alg>::new_varkey(key).map_err(|_| TlsError::Crypto("hmac key"))?;
            for chunk in chunks {
                mac.input(chunk);
            }
            Ok(mac.result().code().to_vec())
        }
    };
}
hmac_fn!(hmac_md5, Md5);
hmac_fn!(hmac_sha1, Sha1);

fn hmac_hash(hash: HashAlgorithm, key: &[u8], chunks: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
    match hash {
        HashAlgorithm::Md5 => hmac_md5(key, chunks),
        HashAlgorithm::Sha1 => hmac_sha1(key, chunks),
    }
}

fn digest_chunks(hash: HashAlgorithm, chunks: &[&[u8]]) -> Vec<u8> {
    match hash {
        HashAlgorithm::Md5 => {
            let mut d = Md5::new();
            for chunk in chunks {
                d.input(chunk);
            }
            d.result().to_vec()
        }
        HashAlgorithm::Sha1 => {
            let mut d = Sha1::new();
            for chunk in chunks {
                d.input(chunk);
            }
            d.result().to_vec()
        }
    }
}

macro_rules! p_hash_fn {
    ($name:ident, $hmac:ident) => {
        // P_hash(secret, seed): A(0) = seed, A(i) = HMAC(secret, A(i-1)),
        // output = HMAC(secret, A(1) + seed) + HMAC(secret, A(2) + seed) + ...
        fn $name(secret: &[u8], label_seed: &[u8], out_len: usize) -> Result<Vec<u8>, TlsError> {
            let mut out = Vec::with_capacity(out_len);
            let mut a = $hmac(secret, &[label_seed])?;
            while out.len() < out_len {
                out.extend_from_slice(&$hmac(secret, &[a.as_slice(), label_seed])?);
                a = $hmac(secret, &[a.as_slice()])?;
            }
            out.truncate(out_len);
            Ok(out)
        }
    };
}
p_hash_fn!(p_md5, hmac_md5);
p_hash_fn!(p_sha1, hmac_sha1);

/// TLS 1.0 PRF: the secret is split into two halves (sharing the middle
/// byte when the length is odd), expanded through P_MD5 and P_SHA1 over
/// `label + seed`, and the streams XORed byte for byte.
pub fn prf(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Result<Vec<u8>, TlsError> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let half = (secret.len() + 1) / 2;
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let md5_stream = p_md5(s1, &label_seed, out_len)?;
    let sha_stream = p_sha1(s2, &label_seed, out_len)?;
    Ok(md5_stream
        .iter()
        .zip(sha_stream.iter())
        .map(|(a, b)| a ^ b)
        .collect())
}

/// SSL3 expansion: one MD5(secret + SHA1(label + secret + rand1 + rand2))
/// block per round, with the round labels "A", "BB", "CCC", ...
fn ssl3_expand(secret: &[u8], rand1: &[u8], rand2: &[u8], out_len: usize) -> Result<Vec<u8>, TlsError> {
    let mut out = Vec::with_capacity(out_len);
    let mut round: usize = 0;
    while out.len() < out_len {
        if round >= 26 {
            return Err(TlsError::Crypto("ssl3 expansion exhausted"));
        }
        let label = vec![b'A' + round as u8; round + 1];
        round += 1;
        let inner = digest_chunks(HashAlgorithm::Sha1, &[&label, secret, rand1, rand2]);
        out.extend_from_slice(&digest_chunks(HashAlgorithm::Md5, &[secret, &inner]));
    }
    out.truncate(out_len);
    Ok(out)
}

/// Shared operation contract of the two wire-format eras. One implementation
/// per era, picked at suite-table construction.
pub trait SuiteVariant: Sync {
    /// MAC over one record: sequence number, header fields and fragment.
    fn record_mac(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        sequence: u64,
        content_type: u8,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError>;

    fn master_secret(
        &self,
        pre_master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Vec<u8>, TlsError>;

    fn key_block(
        &self,
        master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, TlsError>;

    fn finished_verify_data(
        &self,
        master: &[u8],
        transcript: &[u8],
        sender: ConnectionEnd,
    ) -> Result<Vec<u8>, TlsError>;

    /// Digest the peer signs in CertificateVerify.
    fn certificate_verify_digest(&self, master: &[u8], transcript: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Whether CBC padding bytes must all equal the padding length.
    fn strict_padding(&self) -> bool;
}

pub struct Tls1Variant;
pub struct Ssl3Variant;

static TLS1_VARIANT: Tls1Variant = Tls1Variant;
static SSL3_VARIANT: Ssl3Variant = Ssl3Variant;

pub fn variant_for(protocol: SecurityProtocol) -> &'static dyn SuiteVariant {
    match protocol.resolve() {
        SecurityProtocol::Tls1 => &TLS1_VARIANT,
        SecurityProtocol::Ssl3 => &SSL3_VARIANT,
        SecurityProtocol::Default => unreachable!(),
    }
}

impl SuiteVariant for Tls1Variant {
    fn record_mac(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        sequence: u64,
        content_type: u8,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let mut header = Vec::with_capacity(13);
        put_u64(&mut header, sequence);
        header.push(content_type);
        header.push(version.major);
        header.push(version.minor);
        header.push((fragment.len() >> 8) as u8);
        header.push(fragment.len() as u8);
        hmac_hash(hash, secret, &[&header, fragment])
    }

    fn master_secret(
        &self,
        pre_master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        prf(pre_master, MASTER_SECRET_LABEL, &seed, MASTER_SECRET_LEN)
    }

    fn key_block(
        &self,
        master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, TlsError> {
        // Key expansion seeds server random first.
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);
        prf(master, KEY_EXPANSION_LABEL, &seed, out_len)
    }

    fn finished_verify_data(
        &self,
        master: &[u8],
        transcript: &[u8],
        sender: ConnectionEnd,
    ) -> Result<Vec<u8>, TlsError> {
        let label = match sender {
            ConnectionEnd::Client => CLIENT_FINISHED_LABEL,
            ConnectionEnd::Server => SERVER_FINISHED_LABEL,
        };
        let mut digests = digest_chunks(HashAlgorithm::Md5, &[transcript]);
        digests.extend_from_slice(&digest_chunks(HashAlgorithm::Sha1, &[transcript]));
        prf(master, label, &digests, 12)
    }

    fn certificate_verify_digest(&self, _master: &[u8], transcript: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut digest = digest_chunks(HashAlgorithm::Md5, &[transcript]);
        digest.extend_from_slice(&digest_chunks(HashAlgorithm::Sha1, &[transcript]));
        Ok(digest)
    }

    fn strict_padding(&self) -> bool {
        true
    }
}

fn ssl3_pad_len(hash: HashAlgorithm) -> usize {
    match hash {
        HashAlgorithm::Md5 => 48,
        HashAlgorithm::Sha1 => 40,
    }
}

fn ssl3_keyed_digest(
    hash: HashAlgorithm,
    secret: &[u8],
    inner_extra: &[&[u8]],
) -> Vec<u8> {
    let pad1 = vec![0x36u8; ssl3_pad_len(hash)];
    let pad2 = vec![0x5cu8; ssl3_pad_len(hash)];

    let mut inner_chunks: Vec<&[u8]> = Vec::with_capacity(inner_extra.len() + 3);
    inner_chunks.extend_from_slice(inner_extra);
    inner_chunks.push(secret);
    inner_chunks.push(&pad1);
    let inner = digest_chunks(hash, &inner_chunks);

    digest_chunks(hash, &[secret, &pad2, &inner])
}

impl SuiteVariant for Ssl3Variant {
    fn record_mac(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        sequence: u64,
        content_type: u8,
        _version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        // SSL3 does not MAC the version field, and uses the explicit
        // ipad/opad construction instead of a generic keyed hash.
        let pad1 = vec![0x36u8; ssl3_pad_len(hash)];
        let pad2 = vec![0x5cu8; ssl3_pad_len(hash)];

        let mut tail = Vec::with_capacity(11);
        put_u64(&mut tail, sequence);
        tail.push(content_type);
        tail.push((fragment.len() >> 8) as u8);
        tail.push(fragment.len() as u8);

        let inner = digest_chunks(hash, &[secret, &pad1, &tail, fragment]);
        Ok(digest_chunks(hash, &[secret, &pad2, &inner]))
    }

    fn master_secret(
        &self,
        pre_master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        ssl3_expand(pre_master, client_random, server_random, MASTER_SECRET_LEN)
    }

    fn key_block(
        &self,
        master: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, TlsError> {
        ssl3_expand(master, server_random, client_random, out_len)
    }

    fn finished_verify_data(
        &self,
        master: &[u8],
        transcript: &[u8],
        sender: ConnectionEnd,
    ) -> Result<Vec<u8>, TlsError> {
        let sender_bytes = match sender {
            ConnectionEnd::Client => SSL3_SENDER_CLIENT,
            ConnectionEnd::Server => SSL3_SENDER_SERVER,
        };
        let mut out = ssl3_keyed_digest(HashAlgorithm::Md5, master, &[transcript, sender_bytes]);
        out.extend_from_slice(&ssl3_keyed_digest(
            HashAlgorithm::Sha1,
            master,
            &[transcript, sender_bytes],
        ));
        Ok(out)
    }

    fn certificate_verify_digest(&self, master: &[u8], transcript: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut out = ssl3_keyed_digest(HashAlgorithm::Md5, master, &[transcript]);
        out.extend_from_slice(&ssl3_keyed_digest(HashAlgorithm::Sha1, master, &[transcript]));
        Ok(out)
    }

    fn strict_padding(&self) -> bool {
        false
    }
}

/// RC4 keystream. No crate in the supported cipher generation provides it,
/// so the schedule lives here; the state continues across records.
#[derive(Clone)]
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Rc4 {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }
        let mut j: u8 = 0;
        for idx in 0..256 {
            j = j
                .wrapping_add(s[idx])
                .wrapping_add(key[idx % key.len()]);
            s.swap(idx, j as usize);
        }
        Rc4 { s, i: 0, j: 0 }
    }

    pub fn process(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[(self.s[self.i as usize].wrapping_add(self.s[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}

fn cbc_encrypt(
    cipher: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, TlsError> {
    match cipher {
        CipherAlgorithm::Aes if key.len() == 16 => {
            Ok(Cbc::<Aes128, NoPadding>::new_var(key, iv)?.encrypt_vec(data))
        }
        CipherAlgorithm::Aes => Ok(Cbc::<Aes256, NoPadding>::new_var(key, iv)?.encrypt_vec(data)),
        CipherAlgorithm::Des => Ok(Cbc::<Des, NoPadding>::new_var(key, iv)?.encrypt_vec(data)),
        CipherAlgorithm::TripleDes => {
            Ok(Cbc::<TdesEde3, NoPadding>::new_var(key, iv)?.encrypt_vec(data))
        }
        CipherAlgorithm::Rc4 => Err(TlsError::Crypto("rc4 is not a block cipher")),
    }
}

fn cbc_decrypt(
    cipher: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, TlsError> {
    match cipher {
        CipherAlgorithm::Aes if key.len() == 16 => {
            Ok(Cbc::<Aes128, NoPadding>::new_var(key, iv)?.decrypt_vec(data)?)
        }
        CipherAlgorithm::Aes => Ok(Cbc::<Aes256, NoPadding>::new_var(key, iv)?.decrypt_vec(data)?),
        CipherAlgorithm::Des => Ok(Cbc::<Des, NoPadding>::new_var(key, iv)?.decrypt_vec(data)?),
        CipherAlgorithm::TripleDes => {
            Ok(Cbc::<TdesEde3, NoPadding>::new_var(key, iv)?.decrypt_vec(data)?)
        }
        CipherAlgorithm::Rc4 => Err(TlsError::Crypto("rc4 is not a block cipher")),
    }
}

/// One direction of the negotiated transform. CBC carries its chaining IV
/// across records (TLS 1.0 style); RC4 carries its keystream state.
#[derive(Clone)]
pub enum Transform {
    Stream(Rc4),
    Block {
        cipher: CipherAlgorithm,
        key: Vec<u8>,
        iv: Vec<u8>,
    },
}

impl Transform {
    fn new(info: &SuiteInfo, key: &[u8], iv: &[u8]) -> Transform {
        match info.mode {
            CipherMode::Stream => Transform::Stream(Rc4::new(key)),
            CipherMode::Block => Transform::Block {
                cipher: info.cipher,
                key: key.to_vec(),
                iv: iv.to_vec(),
            },
        }
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            Transform::Stream(rc4) => {
                let mut out = data.to_vec();
                rc4.process(&mut out);
                Ok(out)
            }
            Transform::Block { cipher, key, iv } => {
                let out = cbc_encrypt(*cipher, key, iv, data)?;
                let block = iv.len();
                iv.copy_from_slice(&out[out.len() - block..]);
                Ok(out)
            }
        }
    }

    fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            Transform::Stream(rc4) => {
                let mut out = data.to_vec();
                rc4.process(&mut out);
                Ok(out)
            }
            Transform::Block { cipher, key, iv } => {
                let out = cbc_decrypt(*cipher, key, iv, data)?;
                let block = iv.len();
                iv.copy_from_slice(&data[data.len() - block..]);
                Ok(out)
            }
        }
    }

    fn clear(&mut self) {
        if let Transform::Block { key, iv, .. } = self {
            zero(key);
            zero(iv);
        }
    }
}

/// A suite descriptor bound to one connection: the static info plus the
/// per-direction transforms built by `initialize_cipher`.
#[derive(Clone)]
pub struct CipherSuite {
    pub info: &'static SuiteInfo,
    variant: &'static dyn SuiteVariant,
    encryptor: Option<Transform>,
    decryptor: Option<Transform>,
}

impl CipherSuite {
    pub fn new(info: &'static SuiteInfo, protocol: SecurityProtocol) -> CipherSuite {
        CipherSuite {
            info,
            variant: variant_for(protocol),
            encryptor: None,
            decryptor: None,
        }
    }

    pub fn variant(&self) -> &'static dyn SuiteVariant {
        self.variant
    }

    pub fn is_initialized(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Bind the per-direction transforms to the derived write keys. Must be
    /// called once, after `compute_keys`, before any record is protected.
    pub fn initialize_cipher(&mut self, entity: ConnectionEnd, keys: &WriteKeys) {
        let (enc_key, enc_iv, dec_key, dec_iv) = match entity {
            ConnectionEnd::Client => (
                &keys.client_write_key,
                &keys.client_write_iv,
                &keys.server_write_key,
                &keys.server_write_iv,
            ),
            ConnectionEnd::Server => (
                &keys.server_write_key,
                &keys.server_write_iv,
                &keys.client_write_key,
                &keys.client_write_iv,
            ),
        };
        self.encryptor = Some(Transform::new(self.info, enc_key, enc_iv));
        self.decryptor = Some(Transform::new(self.info, dec_key, dec_iv));
    }

    /// fragment + MAC, padded out to the block size for block suites, then
    /// encrypted. Stream suites add no padding.
    pub fn encrypt_record(&mut self, fragment: &[u8], mac: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut plain = Vec::with_capacity(fragment.len() + mac.len() + self.info.block_size + 1);
        plain.extend_from_slice(fragment);
        plain.extend_from_slice(mac);

        if self.info.mode == CipherMode::Block {
            let block = self.info.block_size;
            let pad = (block - (plain.len() + 1) % block) % block;
            for _ in 0..=pad {
                plain.push(pad as u8);
            }
        }

        let transform = self
            .encryptor
            .as_mut()
            .ok_or(TlsError::Crypto("cipher not initialized"))?;
        transform.encrypt(&plain)
    }

    /// Inverse of `encrypt_record`: returns (plaintext, trailing MAC).
    /// Malformed fragments answer an integrity error, never a panic.
    pub fn decrypt_record(&mut self, fragment: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        let hash_size = self.info.hash_size();
        let strict = self.variant.strict_padding();

        let transform = self
            .decryptor
            .as_mut()
            .ok_or(TlsError::Crypto("cipher not initialized"))?;

        let mut plain = match self.info.mode {
            CipherMode::Stream => {
                if fragment.len() < hash_size {
                    return Err(TlsError::BadRecordMac);
                }
                transform.decrypt(fragment)?
            }
            CipherMode::Block => {
                let block = self.info.block_size;
                if fragment.len() < block || fragment.len() % block != 0 {
                    return Err(TlsError::DecryptionFailed);
                }
                let mut plain = transform.decrypt(fragment)?;
                let pad = *plain.last().ok_or(TlsError::BadRecordMac)? as usize;
                if plain.len() < hash_size + pad + 1 {
                    return Err(TlsError::BadRecordMac);
                }
                let body = plain.len() - pad - 1;
                if strict && plain[body..plain.len() - 1].iter().any(|b| *b != pad as u8) {
                    return Err(TlsError::BadRecordMac);
                }
                if !strict && pad >= block {
                    return Err(TlsError::BadRecordMac);
                }
                plain.truncate(body);
                plain
            }
        };

        let mac = plain.split_off(plain.len() - hash_size);
        Ok((plain, mac))
    }
}

/// Derive the 48-byte master secret from the pre-master secret and both
/// randoms, into the context.
pub fn compute_master_secret(ctx: &mut Context, pre_master: &[u8]) -> Result<(), TlsError> {
    let variant = ctx.negotiating_variant()?;
    let master = variant.master_secret(pre_master, &ctx.client_random, &ctx.server_random)?;
    ctx.set_master_secret(&master);
    Ok(())
}

/// Expand the master secret into the key block and slice it into MAC
/// secrets, write keys and IVs. Registers the session for resumption.
pub fn compute_keys(ctx: &mut Context) -> Result<(), TlsError> {
    let info = ctx.negotiating_suite_info()?;
    let variant = ctx.negotiating_variant()?;
    let block = variant.key_block(
        ctx.master_secret(),
        &ctx.client_random,
        &ctx.server_random,
        info.key_block_size(),
    )?;

    let hash_size = info.hash_size();
    let key_size = info.key_material;
    let iv_size = info.iv_size;

    let mut at = 0;
    let client_mac = block[at..at + hash_size].to_vec();
    at += hash_size;
    let server_mac = block[at..at + hash_size].to_vec();
    at += hash_size;

    let mut keys = WriteKeys::default();
    keys.client_write_key = block[at..at + key_size].to_vec();
    at += key_size;
    keys.server_write_key = block[at..at + key_size].to_vec();
    at += key_size;
    keys.client_write_iv = block[at..at + iv_size].to_vec();
    at += iv_size;
    keys.server_write_iv = block[at..at + iv_size].to_vec();

    ctx.install_negotiating_secrets(client_mac, server_mac, keys);
    session::set_context_in_cache(ctx);
    Ok(())
}

impl Drop for CipherSuite {
    fn drop(&mut self) {
        if let Some(t) = self.encryptor.as_mut() {
            t.clear();
        }
        if let Some(t) = self.decryptor.as_mut() {
            t.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{SuiteCollection, TLS_RSA_WITH_AES_128_CBC_SHA, TLS_RSA_WITH_RC4_128_SHA};
    use crate::protocol::{SecurityProtocol, TLS1};

    fn suite(code: u16) -> CipherSuite {
        let table = SuiteCollection::new(SecurityProtocol::Tls1);
        CipherSuite::new(table.by_code(code).expect("suite"), SecurityProtocol::Tls1)
    }

    fn test_keys(info: &SuiteInfo) -> WriteKeys {
        WriteKeys {
            client_write_key: vec![0x11; info.key_material],
            server_write_key: vec![0x22; info.key_material],
            client_write_iv: vec![0x33; info.iv_size],
            server_write_iv: vec![0x44; info.iv_size],
        }
    }

    #[test]
    fn prf_is_deterministic_and_sized() {
        let a = prf(b"secret", b"test label", b"seed", 104).expect("prf");
        let b = prf(b"secret", b"test label", b"seed", 104).expect("prf");
        assert_eq!(a, b);
        assert_eq!(a.len(), 104);
        // Different label, different stream.
        let c = prf(b"secret", b"other label", b"seed", 104).expect("prf");
        assert_ne!(a, c);
    }

    #[test]
    fn prf_splits_odd_secrets_with_shared_middle_byte() {
        // A one-byte secret makes both halves identical, so the output is
        // P_MD5 XOR P_SHA1 of the same key; just pin determinism and length.
        let out = prf(&[0xab], b"l", b"s", 31).expect("prf");
        assert_eq!(out.len(), 31);
    }

    #[test]
    fn ssl3_expansion_is_deterministic_and_sized() {
        let a = ssl3_expand(&[1; 48], &[2; 32], &[3; 32], 72).expect("expand");
        let b = ssl3_expand(&[1; 48], &[2; 32], &[3; 32], 72).expect("expand");
        assert_eq!(a, b);
        assert_eq!(a.len(), 72);
    }

    #[test]
    fn master_secret_is_48_bytes_in_both_eras() {
        for protocol in [SecurityProtocol::Tls1, SecurityProtocol::Ssl3].iter() {
            let variant = variant_for(*protocol);
            let master = variant
                .master_secret(&[7; 48], &[1; 32], &[2; 32])
                .expect("master secret");
            assert_eq!(master.len(), MASTER_SECRET_LEN);
        }
    }

    #[test]
    fn rc4_is_symmetric() {
        let mut enc = Rc4::new(b"0123456789abcdef");
        let mut dec = Rc4::new(b"0123456789abcdef");
        let mut data = b"attack at dawn".to_vec();
        enc.process(&mut data);
        assert_ne!(&data, b"attack at dawn");
        dec.process(&mut data);
        assert_eq!(&data, b"attack at dawn");
    }

    #[test]
    fn record_mac_is_deterministic_and_bit_sensitive() {
        let variant = variant_for(SecurityProtocol::Tls1);
        let secret = [9u8; 20];
        let mac = |seq: u64, ct: u8, frag: &[u8]| {
            variant
                .record_mac(HashAlgorithm::Sha1, &secret, seq, ct, TLS1, frag)
                .expect("mac")
        };
        let base = mac(1, 23, b"hello");
        assert_eq!(base.len(), 20);
        assert_eq!(base, mac(1, 23, b"hello"));
        assert_ne!(base, mac(2, 23, b"hello"));
        assert_ne!(base, mac(1, 22, b"hello"));
        assert_ne!(base, mac(1, 23, b"hellp"));
    }

    #[test]
    fn ssl3_mac_ignores_version_but_not_sequence() {
        let variant = variant_for(SecurityProtocol::Ssl3);
        let secret = [9u8; 20];
        let a = variant
            .record_mac(HashAlgorithm::Sha1, &secret, 5, 23, TLS1, b"data")
            .expect("mac");
        let b = variant
            .record_mac(HashAlgorithm::Sha1, &secret, 5, 23, crate::protocol::SSL3, b"data")
            .expect("mac");
        assert_eq!(a, b);
        let c = variant
            .record_mac(HashAlgorithm::Sha1, &secret, 6, 23, TLS1, b"data")
            .expect("mac");
        assert_ne!(a, c);
    }

    #[test]
    fn block_padding_round_trips_every_length() {
        for len in 0..=48usize {
            let mut enc = suite(TLS_RSA_WITH_AES_128_CBC_SHA);
            let mut dec = suite(TLS_RSA_WITH_AES_128_CBC_SHA);
            let keys = test_keys(enc.info);
            enc.initialize_cipher(ConnectionEnd::Client, &keys);
            dec.initialize_cipher(ConnectionEnd::Server, &keys);

            let fragment = vec![0xa5u8; len];
            let mac = vec![0x5au8; 20];
            let wire = enc.encrypt_record(&fragment, &mac).expect("encrypt");
            assert_eq!(wire.len() % 16, 0);
            let (plain, tag) = dec.decrypt_record(&wire).expect("decrypt");
            assert_eq!(plain, fragment);
            assert_eq!(tag, mac);
        }
    }

    #[test]
    fn stream_suite_round_trips_without_padding() {
        let mut enc = suite(TLS_RSA_WITH_RC4_128_SHA);
        let mut dec = suite(TLS_RSA_WITH_RC4_128_SHA);
        let keys = test_keys(enc.info);
        enc.initialize_cipher(ConnectionEnd::Client, &keys);
        dec.initialize_cipher(ConnectionEnd::Server, &keys);

        let wire = enc.encrypt_record(b"ping", &[7; 20]).expect("encrypt");
        assert_eq!(wire.len(), 4 + 20);
        let (plain, mac) = dec.decrypt_record(&wire).expect("decrypt");
        assert_eq!(plain, b"ping");
        assert_eq!(mac, vec![7; 20]);
    }

    #[test]
    fn short_fragment_is_rejected_not_crashed() {
        let mut dec = suite(TLS_RSA_WITH_RC4_128_SHA);
        let keys = test_keys(dec.info);
        dec.initialize_cipher(ConnectionEnd::Server, &keys);
        assert!(dec.decrypt_record(&[0u8; 5]).is_err());

        let mut dec = suite(TLS_RSA_WITH_AES_128_CBC_SHA);
        let keys = test_keys(dec.info);
        dec.initialize_cipher(ConnectionEnd::Server, &keys);
        assert!(dec.decrypt_record(&[0u8; 5]).is_err());
        assert!(dec.decrypt_record(&[]).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_padding_or_mac_checks() {
        let mut enc = suite(TLS_RSA_WITH_AES_128_CBC_SHA);
        let keys = test_keys(enc.info);
        enc.initialize_cipher(ConnectionEnd::Client, &keys);
        let mut wire = enc.encrypt_record(b"payload", &[3; 20]).expect("encrypt");
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut dec = suite(TLS_RSA_WITH_AES_128_CBC_SHA);
        dec.initialize_cipher(ConnectionEnd::Server, &keys);
        match dec.decrypt_record(&wire) {
            // Either the padding check catches it here, or the caller's MAC
            // comparison would; recovering the original is the failure.
            Ok((plain, mac)) => assert!(plain != b"payload" || mac != vec![3; 20]),
            Err(_) => {}
        }
    }
}
