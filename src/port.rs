// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Loopback TCP port allocator.
//!
//! Hands out unused ports from a half-open range, skipping ports already
//! leased by this broker AND ports already bound anywhere on the host. The
//! latter is checked the portable way: attempt a real bind on
//! `127.0.0.1:port` and drop the probe listener immediately. This reflects
//! true kernel state without platform-specific `/proc`/`netstat` parsing.

use std::collections::HashSet;
use std::net::TcpListener as StdTcpListener;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::PortRangeConfig;
use crate::error::{BrokerError, Result};

pub struct PortAllocator {
    range: std::ops::Range<u16>,
    leased: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRangeConfig) -> Self {
        Self {
            range: range.start..range.end,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Scan ascending for the first port that is neither leased by us nor
    /// bound by anything else on the host, mark it leased, and return it.
    pub fn lease(&self) -> Result<u16> {
        let mut leased = self.leased.lock();
        for port in self.range.clone() {
            if leased.contains(&port) {
                continue;
            }
            if Self::is_free(port) {
                leased.insert(port);
                debug!(port, "Port leased");
                return Ok(port);
            }
        }
        warn!(range = ?self.range, "No port available in range");
        Err(BrokerError::NoPortAvailable)
    }

    /// Idempotent: releasing an unleased or unknown port is a no-op.
    pub fn release(&self, port: u16) {
        if self.leased.lock().remove(&port) {
            debug!(port, "Port released");
        }
    }

    pub fn leased_count(&self) -> usize {
        self.leased.lock().len()
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.leased.lock().contains(&port)
    }

    fn is_free(port: u16) -> bool {
        StdTcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> PortAllocator {
        PortAllocator::new(PortRangeConfig {
            start: 21000,
            end: 21010,
        })
    }

    #[test]
    fn leases_distinct_ports() {
        let alloc = allocator();
        let a = alloc.lease().unwrap();
        let b = alloc.lease().unwrap();
        assert_ne!(a, b);
        assert!(alloc.is_leased(a));
        assert!(alloc.is_leased(b));
    }

    #[test]
    fn release_is_idempotent() {
        let alloc = allocator();
        let p = alloc.lease().unwrap();
        alloc.release(p);
        alloc.release(p);
        assert!(!alloc.is_leased(p));
    }

    #[test]
    fn released_port_is_reusable() {
        let alloc = allocator();
        let p = alloc.lease().unwrap();
        alloc.release(p);
        let p2 = alloc.lease().unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn exhausts_range() {
        let alloc = PortAllocator::new(PortRangeConfig {
            start: 21100,
            end: 21102,
        });
        let _a = alloc.lease().unwrap();
        let _b = alloc.lease().unwrap();
        match alloc.lease() {
            Err(BrokerError::NoPortAvailable) => {}
            other => panic!("expected NoPortAvailable, got {other:?}"),
        }
    }
}
