//! Public port allocation.
//!
//! The allocator lives inside the binding mutex of the connection manager,
//! so every call is already serialized against other allocations and
//! evictions.

use tracing::{debug, warn};

use super::clock::Nanos;
use super::config::PortRange;
use super::error::{NatError, NatResult};
use super::registry::PortRegistry;
use super::Protocol;

/// Ports in an expired slot may be handed out again once the stale binding
/// is evicted.
#[derive(Debug, Clone, Copy)]
pub struct Reclaim {
    pub now: Nanos,
    pub timeout: Nanos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub port: u16,
    /// The slot still belongs to an expired binding which the caller must
    /// evict before reusing the port.
    pub reclaimed: bool,
}

#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    /// Next port to try, per protocol.
    cursors: [u16; Protocol::COUNT],
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            cursors: [range.first; Protocol::COUNT],
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Finds a port for a new `protocol` binding, scanning forward from the
    /// last allocation and wrapping around the range once.
    pub fn allocate(
        &mut self,
        protocol: Protocol,
        registry: &PortRegistry,
        reclaim: Option<Reclaim>,
    ) -> NatResult<Allocation> {
        let first = self.range.first as u32;
        let len = self.range.len();
        let start = self.cursors[protocol.index()] as u32 - first;

        for step in 0..len {
            let port = (first + (start + step) % len) as u16;

            let allocation = if registry.is_free(protocol, port) {
                Allocation {
                    port,
                    reclaimed: false,
                }
            } else if reclaim.is_some_and(|r| {
                registry.is_expired(protocol, port, r.now, r.timeout)
            }) {
                Allocation {
                    port,
                    reclaimed: true,
                }
            } else {
                continue;
            };

            self.cursors[protocol.index()] = self.range.after(port);
            debug!(
                "Allocated {} port {} (reclaimed: {})",
                protocol, port, allocation.reclaimed
            );
            return Ok(allocation);
        }

        warn!(
            "{} port range {}-{} exhausted",
            protocol, self.range.first, self.range.last
        );
        Err(NatError::PortExhausted { protocol })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLIC: u32 = 0xcb00_7101;

    #[test]
    fn test_fresh_registry_starts_at_range_start() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(40000, 40010));

        let a = alloc.allocate(Protocol::Tcp, &reg, None).unwrap();
        assert_eq!(a.port, 40000);
        assert!(!a.reclaimed);
    }

    #[test]
    fn test_sequential_allocation_skips_active_ports() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(40000, 40010));

        reg.occupy(Protocol::Udp, 40001, PUBLIC, 0);
        let first = alloc.allocate(Protocol::Udp, &reg, None).unwrap();
        reg.occupy(Protocol::Udp, first.port, PUBLIC, 0);
        let second = alloc.allocate(Protocol::Udp, &reg, None).unwrap();

        assert_eq!(first.port, 40000);
        assert_eq!(second.port, 40002);
    }

    #[test]
    fn test_cursor_wraps_around() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(100, 102));

        for _ in 0..3 {
            let a = alloc.allocate(Protocol::Tcp, &reg, None).unwrap();
            reg.occupy(Protocol::Tcp, a.port, PUBLIC, 0);
        }
        reg.clear(Protocol::Tcp, 100);

        let a = alloc.allocate(Protocol::Tcp, &reg, None).unwrap();
        assert_eq!(a.port, 100);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(5000, 5001));
        reg.occupy(Protocol::Icmp, 5000, PUBLIC, 0);
        reg.occupy(Protocol::Icmp, 5001, PUBLIC, 0);

        let err = alloc
            .allocate(Protocol::Icmp, &reg, None)
            .unwrap_err();
        assert!(matches!(
            err,
            NatError::PortExhausted {
                protocol: Protocol::Icmp
            }
        ));
    }

    #[test]
    fn test_expired_slot_is_reclaimed_only_when_allowed() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(5000, 5000));
        reg.occupy(Protocol::Udp, 5000, PUBLIC, 0);

        let reclaim = Reclaim {
            now: 1_000,
            timeout: 10,
        };
        assert!(alloc.allocate(Protocol::Udp, &reg, None).is_err());

        let a = alloc
            .allocate(Protocol::Udp, &reg, Some(reclaim))
            .unwrap();
        assert_eq!(
            a,
            Allocation {
                port: 5000,
                reclaimed: true
            }
        );

        let fresh = Reclaim {
            now: 5,
            timeout: 10,
        };
        assert!(
            alloc
                .allocate(Protocol::Udp, &reg, Some(fresh))
                .is_err()
        );
    }

    #[test]
    fn test_protocols_have_independent_cursors() {
        let reg = PortRegistry::new();
        let mut alloc = PortAllocator::new(PortRange::new(2000, 2100));

        let tcp = alloc.allocate(Protocol::Tcp, &reg, None).unwrap();
        reg.occupy(Protocol::Tcp, tcp.port, PUBLIC, 0);
        let udp = alloc.allocate(Protocol::Udp, &reg, None).unwrap();
        assert_eq!(tcp.port, 2000);
        assert_eq!(udp.port, 2000);
    }
}
