//! Static cipher-suite descriptors and the per-family suite tables.
//! Everything here is negotiation-time data; the live per-connection
//! transforms are built in `crypto`.

use crate::errors::TlsError;
use crate::protocol::SecurityProtocol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Rc4,
    Des,
    TripleDes,
    Aes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
}

impl HashAlgorithm {
    pub fn size(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeAlgorithm {
    RsaKeyX,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Stream,
    Block,
}

/// Immutable descriptor for one negotiable suite.
#[derive(Clone, Copy, Debug)]
pub struct SuiteInfo {
    pub code: u16,
    pub name: &'static str,
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
    pub exchange: ExchangeAlgorithm,
    pub exportable: bool,
    pub mode: CipherMode,
    /// Bytes of keying material per write key.
    pub key_material: usize,
    /// Expanded key size; equals `key_material` for every non-exportable suite.
    pub expanded_key_material: usize,
    pub iv_size: usize,
    pub block_size: usize,
}

impl SuiteInfo {
    pub fn hash_size(&self) -> usize {
        self.hash.size()
    }

    /// Total key block length: two MAC secrets, two write keys and, for
    /// block suites, two IVs.
    pub fn key_block_size(&self) -> usize {
        2 * self.hash_size() + 2 * self.key_material + 2 * self.iv_size
    }
}

macro_rules! suite {
    ($code:expr, $name:expr, $cipher:ident, $hash:ident, $mode:ident,
     $key:expr, $iv:expr, $block:expr) => {
        SuiteInfo {
            code: $code,
            name: $name,
            cipher: CipherAlgorithm::$cipher,
            hash: HashAlgorithm::$hash,
            exchange: ExchangeAlgorithm::RsaKeyX,
            exportable: false,
            mode: CipherMode::$mode,
            key_material: $key,
            expanded_key_material: $key,
            iv_size: $iv,
            block_size: $block,
        }
    };
}

pub const TLS_RSA_WITH_RC4_128_MD5: u16 = 0x0004;
pub const TLS_RSA_WITH_RC4_128_SHA: u16 = 0x0005;
pub const TLS_RSA_WITH_DES_CBC_SHA: u16 = 0x0009;
pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0x000a;
pub const TLS_RSA_WITH_AES_128_CBC_SHA: u16 = 0x002f;
pub const TLS_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0035;

static TLS_SUITES: [SuiteInfo; 6] = [
    suite!(TLS_RSA_WITH_RC4_128_MD5, "TLS_RSA_WITH_RC4_128_MD5", Rc4, Md5, Stream, 16, 0, 0),
    suite!(TLS_RSA_WITH_RC4_128_SHA, "TLS_RSA_WITH_RC4_128_SHA", Rc4, Sha1, Stream, 16, 0, 0),
    suite!(TLS_RSA_WITH_DES_CBC_SHA, "TLS_RSA_WITH_DES_CBC_SHA", Des, Sha1, Block, 8, 8, 8),
    suite!(TLS_RSA_WITH_3DES_EDE_CBC_SHA, "TLS_RSA_WITH_3DES_EDE_CBC_SHA", TripleDes, Sha1, Block, 24, 8, 8),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, "TLS_RSA_WITH_AES_128_CBC_SHA", Aes, Sha1, Block, 16, 16, 16),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, "TLS_RSA_WITH_AES_256_CBC_SHA", Aes, Sha1, Block, 32, 16, 16),
];

static SSL_SUITES: [SuiteInfo; 6] = [
    suite!(TLS_RSA_WITH_RC4_128_MD5, "SSL_RSA_WITH_RC4_128_MD5", Rc4, Md5, Stream, 16, 0, 0),
    suite!(TLS_RSA_WITH_RC4_128_SHA, "SSL_RSA_WITH_RC4_128_SHA", Rc4, Sha1, Stream, 16, 0, 0),
    suite!(TLS_RSA_WITH_DES_CBC_SHA, "SSL_RSA_WITH_DES_CBC_SHA", Des, Sha1, Block, 8, 8, 8),
    suite!(TLS_RSA_WITH_3DES_EDE_CBC_SHA, "SSL_RSA_WITH_3DES_EDE_CBC_SHA", TripleDes, Sha1, Block, 24, 8, 8),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, "SSL_RSA_WITH_AES_128_CBC_SHA", Aes, Sha1, Block, 16, 16, 16),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, "SSL_RSA_WITH_AES_256_CBC_SHA", Aes, Sha1, Block, 32, 16, 16),
];

/// The supported-suite table for one protocol family, fixed at context
/// construction.
#[derive(Clone, Copy, Debug)]
pub struct SuiteCollection {
    pub protocol: SecurityProtocol,
    suites: &'static [SuiteInfo],
}

impl SuiteCollection {
    pub fn new(protocol: SecurityProtocol) -> SuiteCollection {
        let suites: &'static [SuiteInfo] = match protocol.resolve() {
            SecurityProtocol::Ssl3 => &SSL_SUITES,
            SecurityProtocol::Tls1 => &TLS_SUITES,
            SecurityProtocol::Default => unreachable!(),
        };
        SuiteCollection { protocol: protocol.resolve(), suites }
    }

    pub fn all(&self) -> &'static [SuiteInfo] {
        self.suites
    }

    pub fn codes(&self) -> Vec<u16> {
        self.suites.iter().map(|s| s.code).collect()
    }

    pub fn by_code(&self, code: u16) -> Result<&'static SuiteInfo, TlsError> {
        self.suites
            .iter()
            .find(|s| s.code == code)
            .ok_or(TlsError::CipherSuiteNotSupported(code))
    }

    pub fn by_name(&self, name: &str) -> Option<&'static SuiteInfo> {
        self.suites.iter().find(|s| s.name == name)
    }

    /// First client-offered code this table supports, in client preference
    /// order.
    pub fn select(&self, offered: &[u16]) -> Result<&'static SuiteInfo, TlsError> {
        for code in offered {
            if let Ok(info) = self.by_code(*code) {
                return Ok(info);
            }
        }
        Err(TlsError::HandshakeFailure("no cipher suite in common"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_cover_both_families() {
        let tls = SuiteCollection::new(SecurityProtocol::Tls1);
        let ssl = SuiteCollection::new(SecurityProtocol::Ssl3);
        assert!(tls.by_name("TLS_RSA_WITH_AES_128_CBC_SHA").is_some());
        assert!(ssl.by_name("SSL_RSA_WITH_AES_128_CBC_SHA").is_some());
        assert_eq!(tls.codes(), ssl.codes());
    }

    #[test]
    fn key_block_sizes() {
        let tls = SuiteCollection::new(SecurityProtocol::Tls1);
        let rc4 = tls.by_code(TLS_RSA_WITH_RC4_128_SHA).expect("rc4 suite");
        assert_eq!(rc4.key_block_size(), 2 * 20 + 2 * 16);
        let aes = tls.by_code(TLS_RSA_WITH_AES_128_CBC_SHA).expect("aes suite");
        assert_eq!(aes.key_block_size(), 2 * 20 + 2 * 16 + 2 * 16);
    }

    #[test]
    fn selection_honours_client_order() {
        let tls = SuiteCollection::new(SecurityProtocol::Tls1);
        let picked = tls
            .select(&[0x1234, TLS_RSA_WITH_RC4_128_SHA, TLS_RSA_WITH_AES_128_CBC_SHA])
            .expect("shared suite");
        assert_eq!(picked.code, TLS_RSA_WITH_RC4_128_SHA);
        assert!(tls.select(&[0x1234]).is_err());
    }

    #[test]
    fn unknown_code_fails_lookup() {
        let tls = SuiteCollection::new(SecurityProtocol::Tls1);
        assert!(tls.by_code(0xc014).is_err());
    }
}
