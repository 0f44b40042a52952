use crate::alert::{AlertDescription, AlertLevel};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("protocol version not supported: {:#06x}", _0)]
    UnsupportedProtocol(u16),
    #[error("cipher suite not supported: {:#06x}", _0)]
    CipherSuiteNotSupported(u16),

    #[error("record MAC verification failed")]
    BadRecordMac,
    #[error("record decryption failed")]
    DecryptionFailed,
    #[error("record larger than the protocol allows")]
    RecordOverflow,

    #[error("decode error: {}", _0)]
    Decode(&'static str),
    #[error("unexpected message: {}", _0)]
    UnexpectedMessage(&'static str),
    #[error("handshake failure: {}", _0)]
    HandshakeFailure(&'static str),

    #[error("peer sent fatal alert: {:?}", _0)]
    AlertReceived(AlertDescription),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("the authentication or decryption has failed")]
    AuthenticationFailed,

    #[error("invalid argument: {}", _0)]
    InvalidArgument(&'static str),
    #[error("cryptographic operation failed: {}", _0)]
    Crypto(&'static str),
    #[error("secure random source failed")]
    RandomSource,
    #[error("RSA operation failed: {}", _0)]
    Rsa(&'static str),

    #[error("{}", _0)]
    StdIoError(#[from] std::io::Error),
    #[error("{}", _0)]
    TryFromIntError(#[from] std::num::TryFromIntError),
    #[error("{}", _0)]
    InvalidKeyIvLengthError(#[from] block_modes::InvalidKeyIvLength),
    #[error("{}", _0)]
    BlockModeError(#[from] block_modes::BlockModeError),
}

impl TlsError {
    /// The alert to send the peer before tearing the connection down, if the
    /// error has a wire equivalent. Peer-signaled and transport-closure
    /// conditions answer `None`: there is nobody left to warn.
    pub fn alert(&self) -> Option<(AlertLevel, AlertDescription)> {
        let description = match self {
            TlsError::UnsupportedProtocol(_) => AlertDescription::ProtocolVersion,
            TlsError::CipherSuiteNotSupported(_) => AlertDescription::HandshakeFailure,
            TlsError::BadRecordMac => AlertDescription::BadRecordMac,
            TlsError::DecryptionFailed => AlertDescription::DecryptError,
            TlsError::RecordOverflow => AlertDescription::RecordOverflow,
            TlsError::Decode(_) => AlertDescription::DecodeError,
            TlsError::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            TlsError::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            TlsError::Rsa(_) => AlertDescription::DecryptError,
            TlsError::Crypto(_)
            | TlsError::RandomSource
            | TlsError::StdIoError(_)
            | TlsError::TryFromIntError(_)
            | TlsError::InvalidKeyIvLengthError(_)
            | TlsError::BlockModeError(_) => AlertDescription::InternalError,
            TlsError::AlertReceived(_)
            | TlsError::ConnectionClosed
            | TlsError::AuthenticationFailed
            | TlsError::InvalidArgument(_) => return None,
        };
        Some((AlertLevel::Fatal, description))
    }
}

#[cfg(test)]
mod tests {
    use crate::alert::AlertDescription;
    use crate::errors::TlsError;

    #[test]
    fn integrity_errors_map_to_bad_record_mac() {
        let (_, description) = TlsError::BadRecordMac.alert().expect("alert expected");
        assert_eq!(description, AlertDescription::BadRecordMac);
    }

    #[test]
    fn peer_signaled_errors_have_no_alert() {
        assert!(TlsError::AlertReceived(AlertDescription::InternalError).alert().is_none());
        assert!(TlsError::ConnectionClosed.alert().is_none());
    }
}
