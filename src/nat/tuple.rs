use std::fmt;
use std::net::Ipv4Addr;

/// Endpoint key used by the session tables: an IPv4 address plus a
/// transport port, or the echo identifier for ICMP.
///
/// Both fields are kept in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tuple {
    pub addr: u32,
    pub port: u16,
}

impl Tuple {
    pub const EMPTY: Tuple = Tuple { addr: 0, port: 0 };

    pub const fn new(addr: u32, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn from_ip(ip: Ipv4Addr, port: u16) -> Self {
        Self::new(u32::from(ip), port)
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}
