use crate::errors::TlsError;
use crate::pack::{Pack, Reader};

use num_traits::FromPrimitive;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    DecryptionFailedReserved = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    NoCertificateReserved = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestrictionReserved = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn new(level: AlertLevel, description: AlertDescription) -> Alert {
        Alert { level, description }
    }

    pub fn close_notify() -> Alert {
        Alert::new(AlertLevel::Warning, AlertDescription::CloseNotify)
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }

    pub fn is_close_notify(&self) -> bool {
        self.description == AlertDescription::CloseNotify
    }
}

impl Pack for Alert {
    fn pack(&self, out: &mut Vec<u8>) {
        out.push(self.level as u8);
        out.push(self.description as u8);
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self, TlsError> {
        let level = AlertLevel::from_u8(r.take_u8()?).ok_or(TlsError::Decode("alert level"))?;
        let description =
            AlertDescription::from_u8(r.take_u8()?).ok_or(TlsError::Decode("alert description"))?;
        Ok(Alert { level, description })
    }
}
