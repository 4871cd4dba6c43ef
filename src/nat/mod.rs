//! Stateful NAPT engine: session tables, port bookkeeping, connection aging
//! and the two directional translators.

pub mod allocator;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod table;
pub mod translate;
pub mod tuple;

use std::fmt;

pub use allocator::PortAllocator;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{MacAddr, NatConfig, NatOptions, PortConfig, PortRange};
pub use error::{NatError, NatResult};
pub use events::{
    Direction, DropReason, EventSink, EvictReason, NatCounters, NatEvent,
    TracingSink,
};
pub use lifecycle::ConnectionManager;
pub use registry::PortRegistry;
pub use table::SessionTables;
pub use translate::{Translator, Verdict};
pub use tuple::Tuple;

/// Transport protocols the engine translates. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Icmp, Protocol::Tcp, Protocol::Udp];
    pub const COUNT: usize = Self::ALL.len();

    pub fn from_ip_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }

    pub fn ip_number(self) -> u8 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }

    /// Dense index used for the per-protocol tables and registries.
    pub fn index(self) -> usize {
        match self {
            Protocol::Icmp => 0,
            Protocol::Tcp => 1,
            Protocol::Udp => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(Protocol::from_ip_number(6), Some(Protocol::Tcp));
        assert_eq!(Protocol::from_ip_number(17), Some(Protocol::Udp));
        assert_eq!(Protocol::from_ip_number(1), Some(Protocol::Icmp));
        assert_eq!(Protocol::from_ip_number(47), None);

        for p in Protocol::ALL {
            assert_eq!(Protocol::from_ip_number(p.ip_number()), Some(p));
        }
    }

    #[test]
    fn test_indices_are_dense() {
        let mut seen = [false; Protocol::COUNT];
        for p in Protocol::ALL {
            seen[p.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
