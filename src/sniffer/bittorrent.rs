use super::{DetectError, Detector, SniffContext, SniffResult};

/// Protocol string length byte followed by the protocol string.
const HANDSHAKE_PREFIX: &[u8] = b"\x13BitTorrent protocol";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BitTorrentHeader;

impl SniffResult for BitTorrentHeader {
    fn protocol(&self) -> &str {
        "bittorrent"
    }

    fn domain(&self) -> &str {
        ""
    }
}

/// Recognises the peer wire handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitTorrentDetector;

impl Detector for BitTorrentDetector {
    fn name(&self) -> &'static str {
        "bittorrent"
    }

    fn detect(&self, payload: &[u8], _ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError> {
        Ok(Box::new(sniff_bittorrent(payload)?))
    }
}

pub fn sniff_bittorrent(payload: &[u8]) -> Result<BitTorrentHeader, DetectError> {
    let checked = payload.len().min(HANDSHAKE_PREFIX.len());
    if payload[..checked] != HANDSHAKE_PREFIX[..checked] {
        return Err(DetectError::NotMatched);
    }
    if checked < HANDSHAKE_PREFIX.len() {
        return Err(DetectError::NoClue);
    }
    Ok(BitTorrentHeader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake() {
        let mut payload = HANDSHAKE_PREFIX.to_vec();
        payload.extend_from_slice(&[0u8; 48]);
        assert_eq!(sniff_bittorrent(&payload), Ok(BitTorrentHeader));
        assert_eq!(sniff_bittorrent(HANDSHAKE_PREFIX), Ok(BitTorrentHeader));
    }

    #[test]
    fn test_short_prefix() {
        assert_eq!(sniff_bittorrent(b""), Err(DetectError::NoClue));
        assert_eq!(sniff_bittorrent(b"\x13BitTor"), Err(DetectError::NoClue));
    }

    #[test]
    fn test_mismatch() {
        assert_eq!(sniff_bittorrent(b"\x12"), Err(DetectError::NotMatched));
        assert_eq!(sniff_bittorrent(b"\x13BitTorrent Protocol"), Err(DetectError::NotMatched));
        assert_eq!(sniff_bittorrent(b"GET / HTTP/1.1\r\n\r\n"), Err(DetectError::NotMatched));
    }
}
