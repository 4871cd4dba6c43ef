//! Static NAT configuration, loaded once from JSON before the first packet.
//!
//! ```json
//! {
//!   "public_port":  { "mac": "02:00:00:00:00:01", "dst_mac": "02:00:00:00:00:fe",
//!                     "address": "203.0.113.1" },
//!   "private_port": { "mac": "02:00:00:00:01:01", "dst_mac": "02:00:00:00:01:fe" },
//!   "options": { "connection_timeout_secs": 60 }
//! }
//! ```

use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use super::error::{NatError, NatResult};
use crate::utils::consts::{
    DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_PORT_FIRST, DEFAULT_PORT_LAST,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = NatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NatError::InvalidConfig(format!("bad MAC address {s:?}"));
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(serde::de::Error::custom)
    }
}

/// One side of the NAT box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Our own MAC on this port, written as the source MAC of frames we send.
    pub mac: MacAddr,
    /// Next hop on this port, written as the destination MAC.
    pub dst_mac: MacAddr,
    /// Address owned on this port. Required on the public side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
}

/// Inclusive range of public ports handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub const fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    pub fn len(&self) -> u32 {
        (self.last as u32 + 1).saturating_sub(self.first as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    /// The port following `port`, wrapping back to the start of the range.
    pub fn after(&self, port: u16) -> u16 {
        if port >= self.last || port < self.first {
            self.first
        } else {
            port + 1
        }
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_FIRST, DEFAULT_PORT_LAST)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatOptions {
    pub connection_timeout_secs: u64,
    pub port_range: PortRange,
    /// Let the allocator take over ports whose binding has expired.
    pub reclaim_expired: bool,
    /// Also age bindings on the egress path. Off by default: only ingress
    /// packets evict stale bindings.
    pub age_check_on_egress: bool,
}

impl NatOptions {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

impl Default for NatOptions {
    fn default() -> Self {
        Self {
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            port_range: PortRange::default(),
            reclaim_expired: true,
            age_check_on_egress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatConfig {
    pub public_port: PortConfig,
    pub private_port: PortConfig,
    #[serde(default)]
    pub options: NatOptions,
}

impl NatConfig {
    pub fn new(public_port: PortConfig, private_port: PortConfig) -> Self {
        Self {
            public_port,
            private_port,
            options: NatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: NatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_json(json: &str) -> NatResult<Self> {
        let config: NatConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> NatResult<Self> {
        let path = path.as_ref();
        let config = Self::from_json(&fs::read_to_string(path)?)?;
        info!(
            "Loaded NAT configuration from {}: public {} ({}), private {}",
            path.display(),
            config.public_address(),
            config.public_port.mac,
            config.private_port.mac
        );
        Ok(config)
    }

    /// The single public address bindings are created on. Only meaningful
    /// on a validated configuration.
    pub fn public_address(&self) -> Ipv4Addr {
        self.public_port
            .address
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub fn validate(&self) -> NatResult<()> {
        let public = self
            .public_port
            .address
            .ok_or_else(|| {
                NatError::InvalidConfig("public port has no address".to_string())
            })?;
        if public.is_unspecified() || public.is_broadcast() {
            return Err(NatError::InvalidConfig(format!(
                "{public} cannot be used as the public address"
            )));
        }
        let range = self.options.port_range;
        if range.is_empty() || range.first == 0 {
            return Err(NatError::InvalidConfig(format!(
                "invalid port range {}-{}",
                range.first, range.last
            )));
        }
        if self.options.connection_timeout_secs == 0 {
            return Err(NatError::InvalidConfig(
                "connection timeout must be positive".to_string(),
            ));
        }
        if self.public_port.mac == self.private_port.mac {
            return Err(NatError::InvalidConfig(
                "public and private ports share a MAC address".to_string(),
            ));
        }
        Ok(())
    }
}
