//! Sniff result types
//!
//! Every detector reports what it found through the [`SniffResult`] trait. The
//! routing layer only ever asks two questions: which protocol, and which
//! domain (if any).

use std::fmt::Debug;

/// Outcome of a successful detection.
pub trait SniffResult: Debug + Send + Sync {
    /// Name of the recognised protocol, e.g. `"http"` or `"tls"`.
    fn protocol(&self) -> &str;

    /// Destination domain, empty when the protocol doesn't carry one.
    fn domain(&self) -> &str;
}

/// A result assembled from two independently sourced results.
///
/// `protocol()` comes from the protocol source and `domain()` from the domain
/// source. Typically the domain source is a metadata-only detector such as
/// fake DNS and the protocol source is a content detector.
#[derive(Debug)]
pub struct CompositeResult {
    domain_result: Box<dyn SniffResult>,
    protocol_result: Box<dyn SniffResult>,
}

impl CompositeResult {
    pub fn new(domain_result: Box<dyn SniffResult>, protocol_result: Box<dyn SniffResult>) -> Self {
        Self {
            domain_result,
            protocol_result,
        }
    }

    pub fn domain_source(&self) -> &dyn SniffResult {
        self.domain_result.as_ref()
    }

    pub fn protocol_source(&self) -> &dyn SniffResult {
        self.protocol_result.as_ref()
    }
}

impl SniffResult for CompositeResult {
    fn protocol(&self) -> &str {
        self.protocol_result.protocol()
    }

    fn domain(&self) -> &str {
        self.domain_result.domain()
    }
}

/// Boxed shorthand for [`CompositeResult::new`].
pub fn composite_result(
    domain_result: Box<dyn SniffResult>,
    protocol_result: Box<dyn SniffResult>,
) -> Box<dyn SniffResult> {
    Box::new(CompositeResult::new(domain_result, protocol_result))
}
