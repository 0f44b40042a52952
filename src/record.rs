//! The record layer: framing, protection and dispatch of the four content
//! types, plus the SSLv2-compatible hello framing some clients still send
//! first.

use crate::alert::{Alert, AlertDescription};
use crate::context::Context;
use crate::errors::TlsError;
use crate::pack::{Pack, Reader};
use crate::transport::Transport;

use log::{debug, trace};
use num_traits::FromPrimitive;
use ring::constant_time;

/// Largest plaintext fragment one record may carry.
pub const MAX_FRAGMENT_LEN: usize = 16384;
/// Largest protected fragment: plaintext plus MAC, padding and expansion.
pub const MAX_CIPHERTEXT_LEN: usize = MAX_FRAGMENT_LEN + 2048;

pub const HEADER_LEN: usize = 5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

/// One decoded incoming record, already decrypted and verified.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordEvent {
    ChangeCipherSpec,
    Handshake(Vec<u8>),
    /// An SSLv2-framed ClientHello body (the bytes after the two-byte
    /// legacy header, starting at the message type).
    LegacyHandshake(Vec<u8>),
    ApplicationData(Vec<u8>),
    Warning(AlertDescription),
    Closed,
}

fn recv_exact<S: Transport>(transport: &S, buf: &mut [u8]) -> Result<(), TlsError> {
    let mut at = 0;
    while at < buf.len() {
        let n = transport.recv(&mut buf[at..])?;
        if n == 0 {
            return Err(TlsError::ConnectionClosed);
        }
        at += n;
    }
    Ok(())
}

fn recv_record_payload<S: Transport>(
    transport: &S,
    header: &[u8; HEADER_LEN],
) -> Result<Vec<u8>, TlsError> {
    if header[1] != 3 {
        return Err(TlsError::UnsupportedProtocol(
            (u16::from(header[1]) << 8) | u16::from(header[2]),
        ));
    }
    let length = ((header[3] as usize) << 8) | header[4] as usize;
    if length > MAX_CIPHERTEXT_LEN {
        return Err(TlsError::RecordOverflow);
    }
    let mut payload = vec![0u8; length];
    recv_exact(transport, &mut payload)?;
    Ok(payload)
}

/// Header and payload of one standard-framed record, read without touching
/// any connection state. The caller deprotects through `open_record`, so a
/// reader can park on the transport while a writer keeps using the context.
pub fn recv_wire_record<S: Transport>(
    transport: &S,
) -> Result<([u8; HEADER_LEN], Vec<u8>), TlsError> {
    let mut header = [0u8; HEADER_LEN];
    recv_exact(transport, &mut header)?;
    let payload = recv_record_payload(transport, &header)?;
    Ok((header, payload))
}

/// Protect and frame a payload into one or more wire records, fragmenting
/// as needed. Records are protected whenever a write cipher is active,
/// except ChangeCipherSpec which always goes out under the old state.
pub fn seal_records(
    ctx: &mut Context,
    content_type: ContentType,
    data: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let mut wire = Vec::with_capacity(HEADER_LEN + data.len());
    let mut remaining = data;
    loop {
        let take = remaining.len().min(MAX_FRAGMENT_LEN);
        let (chunk, rest) = remaining.split_at(take);
        seal_fragment(ctx, content_type, chunk, &mut wire)?;
        if rest.is_empty() {
            return Ok(wire);
        }
        remaining = rest;
    }
}

fn seal_fragment(
    ctx: &mut Context,
    content_type: ContentType,
    fragment: &[u8],
    wire: &mut Vec<u8>,
) -> Result<(), TlsError> {
    let protect = ctx.write_cipher_active() && content_type != ContentType::ChangeCipherSpec;

    let payload = if protect {
        let mac = ctx.write_mac(content_type as u8, fragment)?;
        let sealed = ctx.write_suite_mut()?.encrypt_record(fragment, &mac)?;
        ctx.advance_write_sequence();
        sealed
    } else {
        fragment.to_vec()
    };
    if payload.len() > MAX_CIPHERTEXT_LEN {
        return Err(TlsError::RecordOverflow);
    }

    trace!(
        "send record type={} len={} protected={}",
        content_type as u8,
        payload.len(),
        protect
    );

    wire.push(content_type as u8);
    ctx.version.pack(wire);
    wire.push((payload.len() >> 8) as u8);
    wire.push(payload.len() as u8);
    wire.extend_from_slice(&payload);
    Ok(())
}

/// Record framing over one transport, owning the connection's security
/// context.
pub struct RecordProtocol<S: Transport> {
    transport: S,
    pub ctx: Context,
}

impl<S: Transport> RecordProtocol<S> {
    pub fn new(transport: S, ctx: Context) -> RecordProtocol<S> {
        RecordProtocol { transport, ctx }
    }

    pub fn into_parts(self) -> (S, Context) {
        (self.transport, self.ctx)
    }

    /// Frame and send one content type, fragmenting as needed.
    pub fn send_record(&mut self, content_type: ContentType, data: &[u8]) -> Result<(), TlsError> {
        let wire = seal_records(&mut self.ctx, content_type, data)?;
        self.transport.send(&wire)
    }

    pub fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        debug!("send alert {:?}", alert);
        self.send_record(ContentType::Alert, &alert.to_bytes())
    }

    /// Send ChangeCipherSpec and move our write direction onto the pending
    /// parameters.
    pub fn send_change_cipher_spec(&mut self) -> Result<(), TlsError> {
        self.send_record(ContentType::ChangeCipherSpec, &[1])?;
        self.ctx.switch_write_cipher()
    }

    /// Read, decrypt and verify one record, dispatching on content type.
    /// Fatal alerts surface as errors; CloseNotify marks the context ended.
    pub fn read_record(&mut self) -> Result<RecordEvent, TlsError> {
        if self.ctx.receive_ended {
            return Ok(RecordEvent::Closed);
        }

        let mut header = [0u8; HEADER_LEN];
        recv_exact(&self.transport, &mut header)?;

        // An SSLv2 ClientHello announces itself with the high bit of the
        // first length byte; there is no content type or version yet.
        if header[0] & 0x80 != 0 && !self.ctx.read_cipher_active() {
            return self.read_legacy_hello(&header);
        }

        let payload = recv_record_payload(&self.transport, &header)?;
        self.open_record(&header, payload)
    }

    /// Deprotect and dispatch one already-received record. Split from the
    /// raw receive so a caller can block on the transport without holding
    /// the context.
    pub fn open_record(
        &mut self,
        header: &[u8; HEADER_LEN],
        payload: Vec<u8>,
    ) -> Result<RecordEvent, TlsError> {
        let content_type =
            ContentType::from_u8(header[0]).ok_or(TlsError::Decode("record content type"))?;

        let protected =
            self.ctx.read_cipher_active() && content_type != ContentType::ChangeCipherSpec;
        let plain = if protected {
            let (plain, mac) = self.ctx.read_suite_mut()?.decrypt_record(&payload)?;
            let expected = self.ctx.read_mac(content_type as u8, &plain)?;
            constant_time::verify_slices_are_equal(&mac, &expected)
                .map_err(|_| TlsError::BadRecordMac)?;
            self.ctx.advance_read_sequence();
            plain
        } else {
            payload
        };
        if plain.len() > MAX_FRAGMENT_LEN {
            return Err(TlsError::RecordOverflow);
        }

        trace!(
            "read record type={} len={} protected={}",
            content_type as u8,
            plain.len(),
            protected
        );

        match content_type {
            ContentType::ChangeCipherSpec => {
                if plain != [1] {
                    return Err(TlsError::Decode("change cipher spec body"));
                }
                self.ctx.switch_read_cipher()?;
                Ok(RecordEvent::ChangeCipherSpec)
            }
            ContentType::Alert => {
                let alert = Alert::unpack(&mut Reader::init(&plain))?;
                if alert.is_fatal() {
                    if !self.ctx.session_id.is_empty() {
                        crate::session::remove_session(&self.ctx.session_id);
                    }
                    return Err(TlsError::AlertReceived(alert.description));
                }
                if alert.is_close_notify() {
                    self.ctx.receive_ended = true;
                    return Ok(RecordEvent::Closed);
                }
                debug!("peer warning alert {:?}", alert.description);
                Ok(RecordEvent::Warning(alert.description))
            }
            ContentType::Handshake => Ok(RecordEvent::Handshake(plain)),
            ContentType::ApplicationData => Ok(RecordEvent::ApplicationData(plain)),
        }
    }

    fn read_legacy_hello(&mut self, header: &[u8; HEADER_LEN]) -> Result<RecordEvent, TlsError> {
        let length = (((header[0] & 0x7f) as usize) << 8) | header[1] as usize;
        if length < HEADER_LEN - 2 || length > MAX_CIPHERTEXT_LEN {
            return Err(TlsError::Decode("legacy hello length"));
        }
        let mut body = Vec::with_capacity(length);
        body.extend_from_slice(&header[2..]);
        let mut rest = vec![0u8; length - (HEADER_LEN - 2)];
        recv_exact(&self.transport, &mut rest)?;
        body.extend_from_slice(&rest);
        debug!("read SSLv2-framed hello, {} bytes", body.len());
        Ok(RecordEvent::LegacyHandshake(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use crate::cipher::TLS_RSA_WITH_AES_128_CBC_SHA;
    use crate::context::{Context, RANDOM_LEN};
    use crate::crypto::{self, ConnectionEnd};
    use crate::protocol::SecurityProtocol;
    use crate::transport::pipe;

    fn plain_pair() -> (RecordProtocol<crate::transport::PipeEnd>, RecordProtocol<crate::transport::PipeEnd>) {
        let (a, b) = pipe();
        (
            RecordProtocol::new(a, Context::new(ConnectionEnd::Client, SecurityProtocol::Tls1, "")),
            RecordProtocol::new(b, Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, "")),
        )
    }

    fn keyed_context(entity: ConnectionEnd) -> Context {
        let mut ctx = Context::new(entity, SecurityProtocol::Tls1, "");
        ctx.client_random = [1; RANDOM_LEN];
        ctx.server_random = [2; RANDOM_LEN];
        let info = ctx
            .supported_suites()
            .by_code(TLS_RSA_WITH_AES_128_CBC_SHA)
            .expect("suite");
        ctx.set_negotiating_suite(info);
        crypto::compute_master_secret(&mut ctx, &[3; 48]).expect("master");
        crypto::compute_keys(&mut ctx).expect("keys");
        ctx.initialize_negotiating_cipher().expect("init");
        ctx
    }

    fn protected_pair() -> (RecordProtocol<crate::transport::PipeEnd>, RecordProtocol<crate::transport::PipeEnd>) {
        let (a, b) = pipe();
        let mut client = RecordProtocol::new(a, keyed_context(ConnectionEnd::Client));
        let mut server = RecordProtocol::new(b, keyed_context(ConnectionEnd::Server));
        client.send_change_cipher_spec().expect("client ccs");
        assert_eq!(server.read_record().expect("server ccs"), RecordEvent::ChangeCipherSpec);
        server.send_change_cipher_spec().expect("server ccs");
        assert_eq!(client.read_record().expect("client ccs"), RecordEvent::ChangeCipherSpec);
        (client, server)
    }

    #[test]
    fn plaintext_records_round_trip() {
        let (mut client, mut server) = plain_pair();
        client
            .send_record(ContentType::Handshake, b"hello there")
            .expect("send");
        match server.read_record().expect("read") {
            RecordEvent::Handshake(body) => assert_eq!(body, b"hello there"),
            other => panic!("unexpected event {:?}", other),
        }
        // Nothing was protected, so no sequence moved.
        assert_eq!(client.ctx.write_sequence(), 0);
        assert_eq!(server.ctx.read_sequence(), 0);
    }

    #[test]
    fn protected_records_round_trip_and_count_sequences() {
        let (mut client, mut server) = protected_pair();
        for i in 0..3u8 {
            client
                .send_record(ContentType::ApplicationData, &[i; 100])
                .expect("send");
        }
        for i in 0..3u8 {
            match server.read_record().expect("read") {
                RecordEvent::ApplicationData(body) => assert_eq!(body, vec![i; 100]),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(client.ctx.write_sequence(), 3);
        assert_eq!(server.ctx.read_sequence(), 3);
    }

    #[test]
    fn large_writes_fragment_into_multiple_records() {
        let (mut client, mut server) = plain_pair();
        let big = vec![0x77u8; MAX_FRAGMENT_LEN + 10];
        client
            .send_record(ContentType::ApplicationData, &big)
            .expect("send");
        let mut total = Vec::new();
        let mut records = 0;
        while total.len() < big.len() {
            match server.read_record().expect("read") {
                RecordEvent::ApplicationData(body) => {
                    assert!(body.len() <= MAX_FRAGMENT_LEN);
                    total.extend_from_slice(&body);
                    records += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(total, big);
        // A full fragment plus the 10-byte tail.
        assert_eq!(records, 2);
    }

    #[test]
    fn oversized_length_field_is_an_overflow() {
        let (raw, b) = pipe();
        let mut server = RecordProtocol::new(
            b,
            Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, ""),
        );
        use crate::transport::Transport;
        // type 23, version 3.1, length 0x4900 (> 16384 + 2048)
        raw.send(&[23, 3, 1, 0x49, 0x00]).expect("send header");
        assert!(matches!(
            server.read_record(),
            Err(TlsError::RecordOverflow)
        ));
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let (a, b) = pipe();
        let mut client = RecordProtocol::new(a, keyed_context(ConnectionEnd::Client));
        let mut server = RecordProtocol::new(b, keyed_context(ConnectionEnd::Server));
        client.send_change_cipher_spec().expect("ccs");
        server.read_record().expect("ccs");
        // Server reads protected now, client writes protected. Flip a byte
        // mid-transit by re-framing through a raw pipe.
        let (raw_a, raw_b) = pipe();
        let (_, ctx) = server.into_parts();
        let mut server = RecordProtocol::new(raw_b, ctx);

        let mac = client.ctx.write_mac(23, b"secret").expect("mac");
        let mut wire = client
            .ctx
            .write_suite_mut()
            .expect("suite")
            .encrypt_record(b"secret", &mac)
            .expect("encrypt");
        wire[0] ^= 0x01;
        let mut framed = vec![23, 3, 1, (wire.len() >> 8) as u8, wire.len() as u8];
        framed.extend_from_slice(&wire);
        use crate::transport::Transport;
        raw_a.send(&framed).expect("send");
        assert!(server.read_record().is_err());
    }

    #[test]
    fn fatal_alert_surfaces_as_error_and_warning_does_not() {
        let (mut client, mut server) = plain_pair();
        client
            .send_alert(Alert::new(AlertLevel::Warning, AlertDescription::NoRenegotiation))
            .expect("send");
        assert_eq!(
            server.read_record().expect("read"),
            RecordEvent::Warning(AlertDescription::NoRenegotiation)
        );

        client
            .send_alert(Alert::new(AlertLevel::Fatal, AlertDescription::HandshakeFailure))
            .expect("send");
        assert!(matches!(
            server.read_record(),
            Err(TlsError::AlertReceived(AlertDescription::HandshakeFailure))
        ));
    }

    #[test]
    fn close_notify_ends_the_read_side() {
        let (mut client, mut server) = plain_pair();
        client.send_alert(Alert::close_notify()).expect("send");
        assert_eq!(server.read_record().expect("read"), RecordEvent::Closed);
        // Subsequent reads answer Closed without touching the transport.
        assert_eq!(server.read_record().expect("read"), RecordEvent::Closed);
    }

    #[test]
    fn legacy_hello_framing_is_recognized() {
        let (raw, b) = pipe();
        let mut server = RecordProtocol::new(
            b,
            Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, ""),
        );
        use crate::transport::Transport;
        let body = [1u8, 3, 1, 0, 0, 0, 0, 0, 0]; // truncated v2 hello body
        let mut framed = vec![0x80, body.len() as u8];
        framed.extend_from_slice(&body);
        raw.send(&framed).expect("send");
        match server.read_record().expect("read") {
            RecordEvent::LegacyHandshake(got) => assert_eq!(got, body),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn truncated_transport_is_connection_closed() {
        let (raw, b) = pipe();
        let mut server = RecordProtocol::new(
            b,
            Context::new(ConnectionEnd::Server, SecurityProtocol::Tls1, ""),
        );
        use crate::transport::Transport;
        raw.send(&[22, 3, 1, 0, 10, 1, 2]).expect("send");
        drop(raw);
        assert!(matches!(
            server.read_record(),
            Err(TlsError::ConnectionClosed)
        ));
    }
}
