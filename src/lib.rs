//! Protocol sniffing for proxy routing.
//!
//! Feed the first bytes of a connection to a [`sniffer::Sniffer`] until it
//! reports a protocol (and maybe a domain), gives up, or wants more bytes.

pub mod sniffer;

pub use sniffer::{
    composite_result, default_registry, CancelToken, CompositeResult, DetectError, Detector,
    DetectorDescriptor, Network, SniffContext, SniffError, SniffResult, Sniffer,
};
