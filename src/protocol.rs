use crate::errors::TlsError;
use crate::pack::{Pack, Reader};

/// Protocol family requested at context construction. `Default` resolves to
/// the modern family before any negotiation happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityProtocol {
    Ssl3,
    Tls1,
    Default,
}

impl SecurityProtocol {
    pub fn resolve(self) -> SecurityProtocol {
        match self {
            SecurityProtocol::Default => SecurityProtocol::Tls1,
            other => other,
        }
    }

    /// Whether an incoming wire code is acceptable under these flags.
    pub fn permits(self, code: u16) -> bool {
        match self.resolve() {
            SecurityProtocol::Ssl3 => code == SSL3.code(),
            SecurityProtocol::Tls1 => code == TLS1.code(),
            SecurityProtocol::Default => unreachable!(),
        }
    }

    pub fn version(self) -> ProtocolVersion {
        match self.resolve() {
            SecurityProtocol::Ssl3 => SSL3,
            SecurityProtocol::Tls1 => TLS1,
            SecurityProtocol::Default => unreachable!(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

pub const SSL3: ProtocolVersion = ProtocolVersion { major: 3, minor: 0 };
pub const TLS1: ProtocolVersion = ProtocolVersion { major: 3, minor: 1 };

impl ProtocolVersion {
    pub fn code(self) -> u16 {
        (u16::from(self.major) << 8) | u16::from(self.minor)
    }

    pub fn from_code(code: u16) -> Result<ProtocolVersion, TlsError> {
        match code {
            c if c == SSL3.code() => Ok(SSL3),
            c if c == TLS1.code() => Ok(TLS1),
            other => Err(TlsError::UnsupportedProtocol(other)),
        }
    }

    pub fn family(self) -> Result<SecurityProtocol, TlsError> {
        match self {
            SSL3 => Ok(SecurityProtocol::Ssl3),
            TLS1 => Ok(SecurityProtocol::Tls1),
            other => Err(TlsError::UnsupportedProtocol(other.code())),
        }
    }
}

impl Pack for ProtocolVersion {
    fn pack(&self, out: &mut Vec<u8>) {
        out.push(self.major);
        out.push(self.minor);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let major = r.take_u8()?;
        let minor = r.take_u8()?;
        Ok(ProtocolVersion { major, minor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_to_tls() {
        assert_eq!(SecurityProtocol::Default.version(), TLS1);
        assert!(SecurityProtocol::Default.permits(0x0301));
        assert!(!SecurityProtocol::Default.permits(0x0300));
    }

    #[test]
    fn families_permit_only_their_own_code() {
        assert!(SecurityProtocol::Ssl3.permits(0x0300));
        assert!(!SecurityProtocol::Ssl3.permits(0x0301));
        assert!(SecurityProtocol::Tls1.permits(0x0301));
    }

    #[test]
    fn unknown_code_is_a_protocol_version_error() {
        assert!(ProtocolVersion::from_code(0x0303).is_err());
    }
}
