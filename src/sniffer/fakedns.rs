//! Fake DNS lookups.
//!
//! When the proxy answers DNS queries with addresses from a private pool, the
//! original destination of a later connection tells us which domain the
//! client asked for, before a single payload byte arrives.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ipnet::IpNet;
use tracing::debug;

use super::{DetectError, Detector, SniffContext, SniffResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDnsRecord {
    pub domain: String,
}

impl SniffResult for FakeDnsRecord {
    fn protocol(&self) -> &str {
        "fakedns"
    }

    fn domain(&self) -> &str {
        &self.domain
    }
}

/// Domain <-> address mapping over an address range.
///
/// Addresses are handed out sequentially, skipping the network address, and
/// wrap around once the range is exhausted; a wrapped address is reassigned
/// to the new domain.
#[derive(Debug)]
pub struct FakeDnsPool {
    range: IpNet,
    next: AtomicU64,
    by_addr: DashMap<IpAddr, String>,
    by_domain: DashMap<String, IpAddr>,
}

impl FakeDnsPool {
    pub fn new(range: IpNet) -> Self {
        Self {
            range: range.trunc(),
            next: AtomicU64::new(0),
            by_addr: DashMap::new(),
            by_domain: DashMap::new(),
        }
    }

    pub fn range(&self) -> IpNet {
        self.range
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.range.contains(addr)
    }

    /// Usable addresses in the range, capped at `u64::MAX`.
    fn capacity(&self) -> u64 {
        let host_bits = u32::from(self.range.max_prefix_len() - self.range.prefix_len());
        let size = 1u128.checked_shl(host_bits).unwrap_or(u128::MAX);
        u64::try_from(size - 1).unwrap_or(u64::MAX)
    }

    fn nth_addr(&self, n: u64) -> IpAddr {
        match self.range {
            IpNet::V4(net) => {
                let base = u32::from(net.network());
                IpAddr::V4(Ipv4Addr::from(base.wrapping_add(n as u32)))
            }
            IpNet::V6(net) => {
                let base = u128::from(net.network());
                IpAddr::V6(Ipv6Addr::from(base.wrapping_add(u128::from(n))))
            }
        }
    }

    /// Address for `domain`, allocating one if it has none yet. `None` when
    /// the range has no usable address.
    pub fn assign(&self, domain: &str) -> Option<IpAddr> {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if let Some(addr) = self.by_domain.get(&domain) {
            return Some(*addr);
        }

        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }
        let addr = self.nth_addr(1 + self.next.fetch_add(1, Ordering::Relaxed) % capacity);

        if let Some((_, previous)) = self.by_addr.remove(&addr) {
            self.by_domain.remove(&previous);
        }
        self.by_addr.insert(addr, domain.clone());
        self.by_domain.insert(domain.clone(), addr);
        debug!("fake dns: {} -> {}", domain, addr);
        Some(addr)
    }

    pub fn lookup(&self, addr: &IpAddr) -> Option<String> {
        self.by_addr.get(addr).map(|entry| entry.value().clone())
    }
}

/// Metadata-only detector resolving the original destination through a
/// [`FakeDnsPool`].
#[derive(Debug, Clone)]
pub struct FakeDnsDetector {
    pool: Arc<FakeDnsPool>,
}

impl FakeDnsDetector {
    pub fn new(pool: Arc<FakeDnsPool>) -> Self {
        Self { pool }
    }
}

impl Detector for FakeDnsDetector {
    fn name(&self) -> &'static str {
        "fakedns"
    }

    fn detect(&self, _payload: &[u8], ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError> {
        let target = ctx.target().ok_or(DetectError::NotMatched)?;
        let addr = target.ip();
        if !self.pool.contains(&addr) {
            return Err(DetectError::NotMatched);
        }
        match self.pool.lookup(&addr) {
            Some(domain) => Ok(Box::new(FakeDnsRecord { domain })),
            None => Err(DetectError::NotMatched),
        }
    }
}
