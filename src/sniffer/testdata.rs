//! Byte fixtures shared by the sniffer tests.

use rustls::crypto::ring::cipher_suite::TLS13_AES_128_GCM_SHA256;

pub const QUIC_DCID: [u8; 8] = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];

fn push_u16(buf: &mut Vec<u8>, v: usize) {
    buf.extend_from_slice(&(v as u16).to_be_bytes());
}

fn push_u24(buf: &mut Vec<u8>, v: usize) {
    buf.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
}

/// A minimal ClientHello handshake message (no record header).
pub fn client_hello_handshake(server_name: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0x5a; 32]);
    body.push(0);
    push_u16(&mut body, 2);
    body.extend_from_slice(&[0x13, 0x01]);
    body.extend_from_slice(&[0x01, 0x00]);

    let mut extensions = Vec::new();
    if let Some(name) = server_name {
        let mut list = vec![0x00];
        push_u16(&mut list, name.len());
        list.extend_from_slice(name.as_bytes());

        extensions.extend_from_slice(&[0x00, 0x00]);
        push_u16(&mut extensions, list.len() + 2);
        push_u16(&mut extensions, list.len());
        extensions.extend_from_slice(&list);
    }
    // an unassigned, empty extension after SNI
    extensions.extend_from_slice(&[0x77, 0x77, 0x00, 0x00]);

    push_u16(&mut body, extensions.len());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    push_u24(&mut handshake, body.len());
    handshake.extend_from_slice(&body);
    handshake
}

/// A ClientHello wrapped in a single TLS handshake record.
pub fn tls_client_hello(server_name: Option<&str>) -> Vec<u8> {
    let handshake = client_hello_handshake(server_name);
    let mut record = vec![0x16, 0x03, 0x01];
    push_u16(&mut record, handshake.len());
    record.extend_from_slice(&handshake);
    record
}

/// A client Initial packet for QUIC v1 whose payload is `frames`, protected
/// with the Initial keys derived from [`QUIC_DCID`].
pub fn quic_initial(frames: &[u8]) -> Vec<u8> {
    let keys = TLS13_AES_128_GCM_SHA256
        .tls13()
        .and_then(|suite| suite.quic_suite())
        .expect("AES-128-GCM has a QUIC suite")
        .keys(&QUIC_DCID, rustls::Side::Client, rustls::quic::Version::V1);

    // 1-byte packet number, 16-byte AEAD tag
    let length = 1 + frames.len() + 16;
    assert!(length < 0x4000);

    let mut packet = vec![0xc0, 0x00, 0x00, 0x00, 0x01];
    packet.push(QUIC_DCID.len() as u8);
    packet.extend_from_slice(&QUIC_DCID);
    packet.push(0);
    packet.push(0);
    packet.extend_from_slice(&(0x4000 | length as u16).to_be_bytes());
    let pn_offset = packet.len();
    packet.push(0x00);

    let mut payload = frames.to_vec();
    let tag = keys
        .local
        .packet
        .encrypt_in_place(0, &packet, &mut payload)
        .expect("encrypt initial payload");
    packet.extend_from_slice(&payload);
    packet.extend_from_slice(tag.as_ref());

    let mut sample = [0u8; 16];
    sample.copy_from_slice(&packet[pn_offset + 4..pn_offset + 20]);
    let mut first = packet[0];
    let mut pn = [packet[pn_offset]];
    keys.local
        .header
        .encrypt_in_place(&sample, &mut first, &mut pn)
        .expect("protect initial header");
    packet[0] = first;
    packet[pn_offset] = pn[0];
    packet
}

/// CRYPTO frame carrying `data` at `offset`. Both fit in two-byte varints.
pub fn crypto_frame(offset: usize, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x06];
    frame.extend_from_slice(&(0x4000 | offset as u16).to_be_bytes());
    frame.extend_from_slice(&(0x4000 | data.len() as u16).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}
