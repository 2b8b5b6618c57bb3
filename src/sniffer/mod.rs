//! Payload based protocol sniffing.
//!
//! A [`Sniffer`] is created per connection and fed a growing prefix of the
//! first bytes seen on it. Each registered detector either recognises the
//! protocol, asks for more bytes, or rejects the payload for good.

mod bittorrent;
mod context;
mod fakedns;
mod http_parse;
mod quic_parser;
mod result;
mod tls_parse;

#[cfg(test)]
pub(crate) mod testdata;

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

pub use bittorrent::{BitTorrentDetector, BitTorrentHeader};
pub use context::{CancelToken, Network, SniffContext};
pub use fakedns::{FakeDnsDetector, FakeDnsPool, FakeDnsRecord};
pub use http_parse::{HttpDetector, HttpHeader};
pub use quic_parser::{QuicDetector, QuicHeader};
pub use result::{composite_result, CompositeResult, SniffResult};
pub use tls_parse::{TlsDetector, TlsHeader};

/// Why a single detector did not produce a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    /// Too few bytes to decide; retry with a longer prefix.
    #[error("insufficient data")]
    NoClue,
    #[error("payload does not match")]
    NotMatched,
    #[error("detection cancelled")]
    Cancelled,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Outcome of a dispatch pass that didn't produce a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SniffError {
    /// Some detector is still undecided. Call again with a longer prefix.
    #[error("need more data")]
    NeedMoreData,
    #[error("unknown content")]
    NoMatch,
    #[error("sniffing cancelled")]
    Cancelled,
}

pub trait Detector: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect `payload`, which is empty for metadata-only detectors.
    fn detect(&self, payload: &[u8], ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError>;
}

/// A registered detector together with the pass it runs in.
#[derive(Debug, Clone)]
pub struct DetectorDescriptor {
    detector: Arc<dyn Detector>,
    metadata_only: bool,
}

impl DetectorDescriptor {
    pub fn content(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            metadata_only: false,
        }
    }

    /// A metadata-only detector is run once at connection setup with no
    /// payload. Its outcome is not a traffic protocol for routing.
    pub fn metadata(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            metadata_only: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn is_metadata_only(&self) -> bool {
        self.metadata_only
    }
}

/// The content detectors every connection starts with, in priority order.
pub fn default_registry() -> Vec<DetectorDescriptor> {
    vec![
        DetectorDescriptor::content(Arc::new(HttpDetector)),
        DetectorDescriptor::content(Arc::new(TlsDetector)),
        DetectorDescriptor::content(Arc::new(BitTorrentDetector)),
    ]
}

/// Look up a content detector by its configuration name.
pub fn detector_by_name(name: &str) -> Option<Arc<dyn Detector>> {
    match name {
        "http" => Some(Arc::new(HttpDetector)),
        "tls" => Some(Arc::new(TlsDetector)),
        "bittorrent" => Some(Arc::new(BitTorrentDetector)),
        "quic" => Some(Arc::new(QuicDetector)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Content,
    Metadata,
}

/// Still-viable detectors for one connection.
///
/// The list only ever shrinks: a detector that rejected the payload is gone
/// for the rest of this connection, and the survivors keep their order.
#[derive(Debug, Clone)]
pub struct Sniffer {
    detectors: Vec<DetectorDescriptor>,
}

impl Default for Sniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sniffer {
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    pub fn with_registry(detectors: Vec<DetectorDescriptor>) -> Self {
        Self { detectors }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run the content detectors against the bytes seen so far.
    pub fn sniff(&mut self, payload: &[u8], ctx: &SniffContext) -> Result<Box<dyn SniffResult>, SniffError> {
        self.run_pass(Pass::Content, payload, ctx)
    }

    /// Run the metadata-only detectors. Meant to be called once at connection
    /// setup, before the first [`Sniffer::sniff`].
    pub fn sniff_metadata(&mut self, ctx: &SniffContext) -> Result<Box<dyn SniffResult>, SniffError> {
        self.run_pass(Pass::Metadata, &[], ctx)
    }

    fn run_pass(
        &mut self,
        pass: Pass,
        payload: &[u8],
        ctx: &SniffContext,
    ) -> Result<Box<dyn SniffResult>, SniffError> {
        let mut pending = Vec::with_capacity(self.detectors.len());
        let mut undecided = false;

        for descriptor in self.detectors.iter() {
            // The other pass's detectors are carried over untouched.
            if descriptor.metadata_only != (pass == Pass::Metadata) {
                pending.push(descriptor.clone());
                continue;
            }

            if ctx.is_cancelled() {
                return Err(SniffError::Cancelled);
            }

            match descriptor.detector.detect(payload, ctx) {
                Ok(result) if !result.protocol().is_empty() => {
                    debug!(
                        "{} sniffed {} (domain: {:?}) with {} bytes",
                        ctx,
                        result.protocol(),
                        result.domain(),
                        payload.len()
                    );
                    return Ok(result);
                }
                Ok(_) => {
                    trace!("{} returned an empty protocol, dropped", descriptor.name());
                }
                Err(DetectError::NoClue) => {
                    trace!("{} needs more than {} bytes", descriptor.name(), payload.len());
                    pending.push(descriptor.clone());
                    undecided = true;
                }
                Err(DetectError::Cancelled) => return Err(SniffError::Cancelled),
                Err(err) => {
                    trace!("{} dropped: {}", descriptor.name(), err);
                }
            }
        }

        self.detectors = pending;

        if undecided {
            Err(SniffError::NeedMoreData)
        } else {
            Err(SniffError::NoMatch)
        }
    }
}
