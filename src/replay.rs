use std::fmt::Display;

use tracing::debug;

use rsniff::{composite_result, SniffContext, SniffError, SniffResult, Sniffer};

use crate::utils::is_valid_domain;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Matched {
        protocol: String,
        domain: Option<String>,
        bytes: usize,
    },
    Unknown {
        bytes: usize,
    },
    /// The capture ended while some detector still wanted more bytes.
    Incomplete {
        bytes: usize,
    },
    Cancelled,
}

impl Verdict {
    fn matched(result: &dyn SniffResult, bytes: usize) -> Self {
        Verdict::Matched {
            protocol: result.protocol().to_owned(),
            domain: Some(result.domain().to_owned()).filter(|d| is_valid_domain(d)),
            bytes,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Matched {
                protocol,
                domain: Some(domain),
                bytes,
            } => write!(f, "{} {} ({} bytes)", protocol, domain, bytes),
            Verdict::Matched {
                protocol, bytes, ..
            } => write!(f, "{} ({} bytes)", protocol, bytes),
            Verdict::Unknown { bytes } => write!(f, "unknown content ({} bytes)", bytes),
            Verdict::Incomplete { bytes } => write!(f, "undecided after {} bytes", bytes),
            Verdict::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Drive `sniffer` the way a connection's read loop would: the metadata pass
/// once, then content passes over a prefix growing by `chunk_size` bytes.
pub fn replay(sniffer: &mut Sniffer, payload: &[u8], chunk_size: usize, ctx: &SniffContext) -> Verdict {
    let metadata = match sniffer.sniff_metadata(ctx) {
        Ok(result) => Some(result),
        Err(SniffError::Cancelled) => return Verdict::Cancelled,
        Err(err) => {
            debug!("{} metadata: {}", ctx, err);
            None
        }
    };

    let mut end = 0;
    loop {
        end = (end + chunk_size.max(1)).min(payload.len());
        match sniffer.sniff(&payload[..end], ctx) {
            Ok(result) => {
                let result = match metadata {
                    Some(meta) => composite_result(meta, result),
                    None => result,
                };
                return Verdict::matched(result.as_ref(), end);
            }
            Err(SniffError::NeedMoreData) if end < payload.len() => continue,
            Err(SniffError::NeedMoreData) => return Verdict::Incomplete { bytes: end },
            // content unknown, the metadata result still names the destination
            Err(SniffError::NoMatch) => {
                return match metadata {
                    Some(meta) => Verdict::matched(meta.as_ref(), end),
                    None => Verdict::Unknown { bytes: end },
                }
            }
            Err(SniffError::Cancelled) => return Verdict::Cancelled,
        }
    }
}
