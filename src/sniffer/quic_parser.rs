use std::io::Read;

use byteorder::ReadBytesExt;
use bytes::Buf;
use rustls::crypto::ring::cipher_suite::TLS13_AES_128_GCM_SHA256;
use thiserror::Error;
use tls_parser::{TlsMessage, TlsMessageHandshake};

use super::{DetectError, Detector, Network, SniffContext, SniffResult};

// QUIC version constants (RFC 9000)
const VERSION_DRAFT29: u32 = 0xff00001d;
const VERSION1: u32 = 0x1;

// QUIC frame types
const FRAME_TYPE_PADDING: u8 = 0x00;
const FRAME_TYPE_PING: u8 = 0x01;
const FRAME_TYPE_ACK: u8 = 0x02;
const FRAME_TYPE_ACK_ECN: u8 = 0x03;
const FRAME_TYPE_CRYPTO: u8 = 0x06;
const FRAME_TYPE_CONNECTION_CLOSE: u8 = 0x1c;

// AES-128-GCM header protection sample and AEAD tag
const SAMPLE_LEN: usize = 16;
const MAX_PACKET_NUMBER_LEN: usize = 4;

#[derive(Debug, Error)]
enum QuicParseError {
    #[error("Not a QUIC long header packet")]
    NotLongHeader,
    #[error("Unsupported QUIC version: {0:#x}")]
    UnsupportedVersion(u32),
    #[error("Not an Initial packet")]
    NotInitialPacket,
    #[error("Packet decryption failed")]
    DecryptionFailed,
    #[error("Unexpected frame type {0:#x} in Initial packet")]
    UnexpectedFrame(u8),
    #[error("No ClientHello in CRYPTO frames")]
    NoClientHello,
    #[error("Insufficient data to parse")]
    InsufficientData,
}

impl From<QuicParseError> for DetectError {
    fn from(err: QuicParseError) -> Self {
        match err {
            QuicParseError::InsufficientData => DetectError::NoClue,
            QuicParseError::NotLongHeader
            | QuicParseError::UnsupportedVersion(_)
            | QuicParseError::NotInitialPacket => DetectError::NotMatched,
            err => DetectError::Malformed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicHeader {
    pub version: u32,
    pub server_name: String,
}

impl SniffResult for QuicHeader {
    fn protocol(&self) -> &str {
        "quic"
    }

    fn domain(&self) -> &str {
        &self.server_name
    }
}

/// Recognises a client Initial packet on UDP and decrypts it to read the SNI
/// of the ClientHello inside.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuicDetector;

impl Detector for QuicDetector {
    fn name(&self) -> &'static str {
        "quic"
    }

    fn detect(&self, payload: &[u8], ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError> {
        if ctx.network() != Network::Udp {
            return Err(DetectError::NotMatched);
        }
        match parse_initial(payload) {
            Ok(header) => Ok(Box::new(header)),
            Err(err) => {
                tracing::debug!("QUIC parse error: {}", err);
                Err(err.into())
            }
        }
    }
}

fn version_to_rustls(version: u32) -> Option<rustls::quic::Version> {
    match version {
        VERSION_DRAFT29 => Some(rustls::quic::Version::V1Draft),
        VERSION1 => Some(rustls::quic::Version::V1),
        _ => None,
    }
}

/// Decode a QUIC variable-length integer (RFC 9000 Section 16)
fn decode_varint<B: Buf>(r: &mut B) -> Option<u64> {
    if !r.has_remaining() {
        return None;
    }
    let first = r.get_u8();
    let len = 1usize << (first >> 6);
    if r.remaining() < len - 1 {
        return None;
    }
    let mut value = u64::from(first & 0b0011_1111);
    for _ in 1..len {
        value = (value << 8) | u64::from(r.get_u8());
    }
    Some(value)
}

fn read_varint<B: Buf>(r: &mut B) -> Result<u64, QuicParseError> {
    decode_varint(r).ok_or(QuicParseError::InsufficientData)
}

fn read_vec(r: &mut std::io::Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, QuicParseError> {
    if r.remaining() < len {
        return Err(QuicParseError::InsufficientData);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .map_err(|_| QuicParseError::InsufficientData)?;
    Ok(buf)
}

/// Parse a client Initial packet (RFC 9000 Section 17.2.2), remove header
/// protection and decrypt it with the Initial keys (RFC 9001 Section 5), then
/// read the SNI from the ClientHello carried in its CRYPTO frames.
fn parse_initial(packet: &[u8]) -> Result<QuicHeader, QuicParseError> {
    let mut buffer = std::io::Cursor::new(packet);

    let type_byte = buffer
        .read_u8()
        .map_err(|_| QuicParseError::InsufficientData)?;
    // long header form and fixed bit
    if type_byte & 0xc0 != 0xc0 {
        return Err(QuicParseError::NotLongHeader);
    }

    let version = buffer
        .read_u32::<byteorder::BigEndian>()
        .map_err(|_| QuicParseError::InsufficientData)?;
    let rustls_version =
        version_to_rustls(version).ok_or(QuicParseError::UnsupportedVersion(version))?;

    if (type_byte & 0x30) >> 4 != 0x0 {
        return Err(QuicParseError::NotInitialPacket);
    }

    let dcid_len = buffer
        .read_u8()
        .map_err(|_| QuicParseError::InsufficientData)? as usize;
    let dcid = read_vec(&mut buffer, dcid_len)?;
    let scid_len = buffer
        .read_u8()
        .map_err(|_| QuicParseError::InsufficientData)? as usize;
    read_vec(&mut buffer, scid_len)?;

    let token_len = read_varint(&mut buffer)? as usize;
    read_vec(&mut buffer, token_len)?;

    let packet_len = read_varint(&mut buffer)? as usize;
    let pn_offset = buffer.position() as usize;
    let packet_end = pn_offset
        .checked_add(packet_len)
        .ok_or(QuicParseError::DecryptionFailed)?;
    if packet.len() < packet_end || packet.len() < pn_offset + MAX_PACKET_NUMBER_LEN + SAMPLE_LEN {
        return Err(QuicParseError::InsufficientData);
    }

    let keys = TLS13_AES_128_GCM_SHA256
        .tls13()
        .and_then(|suite| suite.quic_suite())
        .ok_or(QuicParseError::DecryptionFailed)?
        .keys(&dcid, rustls::Side::Client, rustls_version);

    let sample_at = pn_offset + MAX_PACKET_NUMBER_LEN;
    let mut first_byte = packet[0];
    let mut pn = [0u8; MAX_PACKET_NUMBER_LEN];
    pn.copy_from_slice(&packet[pn_offset..sample_at]);
    keys.local
        .header
        .decrypt_in_place(
            &packet[sample_at..sample_at + SAMPLE_LEN],
            &mut first_byte,
            &mut pn,
        )
        .map_err(|_| QuicParseError::DecryptionFailed)?;

    let pn_len = 1 + (first_byte & 0b11) as usize;
    let packet_number = pn[..pn_len]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    if packet_end < pn_offset + pn_len {
        return Err(QuicParseError::DecryptionFailed);
    }

    let mut header = packet[..pn_offset + pn_len].to_vec();
    header[0] = first_byte;
    header[pn_offset..].copy_from_slice(&pn[..pn_len]);

    let mut payload = packet[pn_offset + pn_len..packet_end].to_vec();
    let plain = keys
        .local
        .packet
        .decrypt_in_place(packet_number, &header, &mut payload)
        .map_err(|_| QuicParseError::DecryptionFailed)?;

    let server_name = client_hello_server_name(&reassemble_crypto(plain)?)?;
    Ok(QuicHeader {
        version,
        server_name,
    })
}

/// Collect CRYPTO frame data and return the contiguous stream from offset 0.
fn reassemble_crypto(frames: &[u8]) -> Result<Vec<u8>, QuicParseError> {
    let mut cursor = std::io::Cursor::new(frames);
    let mut chunks: Vec<(u64, Vec<u8>)> = Vec::new();

    while cursor.has_remaining() {
        match cursor.get_u8() {
            FRAME_TYPE_PADDING | FRAME_TYPE_PING => {}
            frame @ (FRAME_TYPE_ACK | FRAME_TYPE_ACK_ECN) => {
                // largest acked, delay, range count, first range
                read_varint(&mut cursor)?;
                read_varint(&mut cursor)?;
                let ranges = read_varint(&mut cursor)?;
                read_varint(&mut cursor)?;
                for _ in 0..ranges {
                    read_varint(&mut cursor)?;
                    read_varint(&mut cursor)?;
                }
                if frame == FRAME_TYPE_ACK_ECN {
                    for _ in 0..3 {
                        read_varint(&mut cursor)?;
                    }
                }
            }
            FRAME_TYPE_CRYPTO => {
                let offset = read_varint(&mut cursor)?;
                let length = read_varint(&mut cursor)? as usize;
                chunks.push((offset, read_vec(&mut cursor, length)?));
            }
            FRAME_TYPE_CONNECTION_CLOSE => return Err(QuicParseError::NoClientHello),
            other => return Err(QuicParseError::UnexpectedFrame(other)),
        }
    }

    chunks.sort_by_key(|(offset, _)| *offset);
    let mut stream = Vec::new();
    for (offset, data) in chunks {
        let offset = offset as usize;
        if offset > stream.len() {
            break;
        }
        let overlap = stream.len() - offset;
        if overlap < data.len() {
            stream.extend_from_slice(&data[overlap..]);
        }
    }

    if stream.is_empty() {
        return Err(QuicParseError::NoClientHello);
    }
    Ok(stream)
}

fn client_hello_server_name(handshake: &[u8]) -> Result<String, QuicParseError> {
    match tls_parser::parse_tls_message_handshake(handshake) {
        Ok((_, TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)))) => {
            Ok(super::tls_parse::server_name(&ch).unwrap_or_default())
        }
        Ok(_) => Err(QuicParseError::NoClientHello),
        // the ClientHello continues in a later packet
        Err(nom::Err::Incomplete(_)) => Err(QuicParseError::InsufficientData),
        Err(_) => Err(QuicParseError::NoClientHello),
    }
}
