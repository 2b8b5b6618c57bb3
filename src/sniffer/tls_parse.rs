use tls_parser::{
    parse_tls_extension, TlsClientHelloContents, TlsExtension, TlsMessage, TlsMessageHandshake,
};

use super::{DetectError, Detector, SniffContext, SniffResult};

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHeader {
    /// Legacy version from the ClientHello, e.g. `0x0303`.
    pub version: u16,
    pub server_name: String,
}

impl SniffResult for TlsHeader {
    fn protocol(&self) -> &str {
        "tls"
    }

    fn domain(&self) -> &str {
        &self.server_name
    }
}

/// Recognises a TLS ClientHello record and pulls the SNI out of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsDetector;

impl Detector for TlsDetector {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn detect(&self, payload: &[u8], _ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError> {
        Ok(Box::new(sniff_tls(payload)?))
    }
}

pub fn sniff_tls(payload: &[u8]) -> Result<TlsHeader, DetectError> {
    match payload.first() {
        Some(&CONTENT_TYPE_HANDSHAKE) => {}
        Some(_) => return Err(DetectError::NotMatched),
        None => return Err(DetectError::NoClue),
    }
    if payload.len() < RECORD_HEADER_LEN {
        return Err(DetectError::NoClue);
    }
    if payload[1] != 0x03 {
        return Err(DetectError::NotMatched);
    }

    let record_len = u16::from_be_bytes([payload[3], payload[4]]) as usize;
    if payload.len() < RECORD_HEADER_LEN + record_len {
        return Err(DetectError::NoClue);
    }

    let (_remaining, tls) = tls_parser::parse_tls_plaintext(&payload[..RECORD_HEADER_LEN + record_len])
        .map_err(|err| match err {
            nom::Err::Incomplete(_) => DetectError::NoClue,
            err => DetectError::Malformed(format!("tls record: {:?}", err)),
        })?;

    for msg in tls.msg {
        if let TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) = msg {
            return Ok(TlsHeader {
                version: ch.version.0,
                server_name: server_name(&ch).unwrap_or_default(),
            });
        }
    }

    Err(DetectError::NotMatched)
}

/// First host name in the SNI extension of a ClientHello.
pub(super) fn server_name(ch: &TlsClientHelloContents) -> Option<String> {
    let mut remaining = ch.ext?;
    while let Ok((rest, ext)) = parse_tls_extension(remaining) {
        remaining = rest;
        if let TlsExtension::SNI(sni) = ext {
            return sni
                .into_iter()
                .find_map(|(_, name)| std::str::from_utf8(name).ok())
                .map(|name| name.to_ascii_lowercase());
        }
    }
    None
}
