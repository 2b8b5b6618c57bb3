use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a connection driver and
/// whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// Per-connection execution context handed to every detector.
///
/// Metadata-only detectors have no payload to look at, so whatever they
/// decide comes from here (the original destination, mostly).
#[derive(Debug, Clone)]
pub struct SniffContext {
    cancel: CancelToken,
    network: Network,
    source: Option<SocketAddr>,
    target: Option<SocketAddr>,
}

impl SniffContext {
    pub fn new(network: Network) -> Self {
        Self {
            cancel: CancelToken::new(),
            network,
            source: None,
            target: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Display for SniffContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_addr = |addr: Option<SocketAddr>| addr.map_or("?".to_owned(), |a| a.to_string());
        write!(
            f,
            "{}:{} -> {}",
            self.network,
            fmt_addr(self.source),
            fmt_addr(self.target)
        )
    }
}
