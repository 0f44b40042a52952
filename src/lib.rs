//!# SSL/TLS protocol engine
//!
//! An SSL 3.0 / TLS 1.0 record and handshake implementation over an
//! arbitrary byte transport, with RSA key exchange, session resumption
//! and a blocking stream facade.
//!
//! Certificate parsing and chain validation are external concerns: the
//! handshake hands DER certificates to a caller-supplied key extractor.

#[macro_use]
extern crate enum_primitive_derive;
extern crate num_traits;

pub mod alert;
pub mod cipher;
pub mod client;
mod context;
mod crypto;
pub mod errors;
mod handshake;
mod messages;
mod pack;
pub mod protocol;
pub mod record;
pub mod rsa;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use crate::client::{ClientConfig, ClientSession, Identity, KeyExtractor};
pub use crate::context::{Context, HandshakeState};
pub use crate::crypto::ConnectionEnd;
pub use crate::errors::TlsError;
pub use crate::protocol::SecurityProtocol;
pub use crate::server::{ServerConfig, ServerIdentity, ServerSession};
pub use crate::stream::TlsStream;
