//! Mutable view over an Ethernet/IPv4 frame.
//!
//! Headers are validated once with `etherparse`; after that the accessors
//! read and write fields in place at fixed offsets. Addresses and ports are
//! exchanged in host byte order, the frame itself always stays in network
//! byte order. The ICMP identifier is the exception: it is an opaque token
//! and is copied as raw bytes, without a swap.

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use etherparse::{EtherType, Ethernet2HeaderSlice, Ipv4HeaderSlice};

use crate::nat::{MacAddr, Protocol, Tuple};

pub const ETHERNET_HEADER_LEN: usize = 14;

const IPV4_SRC: usize = 12;
const IPV4_DST: usize = 16;
const L4_SRC_PORT: usize = 0;
const L4_DST_PORT: usize = 2;
const ICMP_IDENTIFIER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes for the headers the frame claims to have.
    Malformed,
    NotIpv4,
    UnsupportedProtocol(u8),
}

/// Offsets of the interesting headers inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub l3: usize,
    pub l4: usize,
    /// IP protocol number of the payload.
    pub ip_number: u8,
    /// Bytes of L4 data present, bounded by both the IPv4 total length and
    /// the captured frame.
    pub l4_len: usize,
}

impl Layout {
    pub fn of(data: &[u8]) -> Result<Self, ParseError> {
        let eth = Ethernet2HeaderSlice::from_slice(data)
            .map_err(|_| ParseError::Malformed)?;
        if eth.ether_type() != EtherType::IPV4 {
            return Err(ParseError::NotIpv4);
        }

        let l3 = ETHERNET_HEADER_LEN;
        let ip = Ipv4HeaderSlice::from_slice(&data[l3..])
            .map_err(|_| ParseError::Malformed)?;
        let ihl = ip.ihl() as usize * 4;
        let l4 = l3 + ihl;
        let l4_len = (ip.total_len() as usize)
            .saturating_sub(ihl)
            .min(data.len() - l4);

        Ok(Self {
            l3,
            l4,
            ip_number: ip.protocol().0,
            l4_len,
        })
    }
}

fn min_l4_len(protocol: Protocol) -> usize {
    match protocol {
        Protocol::Tcp => 20,
        Protocol::Udp => 8,
        // type, code, checksum, identifier, sequence
        Protocol::Icmp => 8,
    }
}

pub struct Frame<'a> {
    data: &'a mut [u8],
    layout: Layout,
    protocol: Protocol,
}

impl<'a> Frame<'a> {
    pub fn parse(data: &'a mut [u8]) -> Result<Self, ParseError> {
        let layout = Layout::of(data)?;
        let protocol = Protocol::from_ip_number(layout.ip_number)
            .ok_or(ParseError::UnsupportedProtocol(layout.ip_number))?;
        if data.len() < layout.l4 + min_l4_len(protocol) {
            return Err(ParseError::Malformed);
        }
        Ok(Self {
            data,
            layout,
            protocol,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dst_mac(&self) -> MacAddr {
        mac_at(self.data, 0)
    }

    pub fn src_mac(&self) -> MacAddr {
        mac_at(self.data, 6)
    }

    pub fn set_dst_mac(&mut self, mac: MacAddr) {
        self.data[0..6].copy_from_slice(&mac.octets());
    }

    pub fn set_src_mac(&mut self, mac: MacAddr) {
        self.data[6..12].copy_from_slice(&mac.octets());
    }

    pub fn src_addr(&self) -> u32 {
        BigEndian::read_u32(&self.data[self.layout.l3 + IPV4_SRC..])
    }

    pub fn dst_addr(&self) -> u32 {
        BigEndian::read_u32(&self.data[self.layout.l3 + IPV4_DST..])
    }

    pub fn set_src_addr(&mut self, addr: u32) {
        BigEndian::write_u32(&mut self.data[self.layout.l3 + IPV4_SRC..], addr);
    }

    pub fn set_dst_addr(&mut self, addr: u32) {
        BigEndian::write_u32(&mut self.data[self.layout.l3 + IPV4_DST..], addr);
    }

    /// Offset of the port-equivalent field; ICMP has a single identifier
    /// serving both directions.
    fn port_offset(&self, tcp_udp_offset: usize) -> usize {
        self.layout.l4
            + match self.protocol {
                Protocol::Tcp | Protocol::Udp => tcp_udp_offset,
                Protocol::Icmp => ICMP_IDENTIFIER,
            }
    }

    fn read_port(&self, tcp_udp_offset: usize) -> u16 {
        let field = &self.data[self.port_offset(tcp_udp_offset)..];
        match self.protocol {
            Protocol::Icmp => NativeEndian::read_u16(field),
            Protocol::Tcp | Protocol::Udp => BigEndian::read_u16(field),
        }
    }

    fn write_port(&mut self, tcp_udp_offset: usize, port: u16) {
        let at = self.port_offset(tcp_udp_offset);
        let field = &mut self.data[at..];
        match self.protocol {
            Protocol::Icmp => NativeEndian::write_u16(field, port),
            Protocol::Tcp | Protocol::Udp => BigEndian::write_u16(field, port),
        }
    }

    pub fn src_port(&self) -> u16 {
        self.read_port(L4_SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        self.read_port(L4_DST_PORT)
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.write_port(L4_SRC_PORT, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.write_port(L4_DST_PORT, port);
    }

    pub fn source(&self) -> Tuple {
        Tuple::new(self.src_addr(), self.src_port())
    }

    pub fn destination(&self) -> Tuple {
        Tuple::new(self.dst_addr(), self.dst_port())
    }
}

fn mac_at(data: &[u8], at: usize) -> MacAddr {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&data[at..at + 6]);
    MacAddr::new(mac)
}

/// Destination MAC of a raw frame, used to tell which port it arrived on.
pub fn frame_dst_mac(data: &[u8]) -> Option<MacAddr> {
    (data.len() >= ETHERNET_HEADER_LEN).then(|| mac_at(data, 0))
}

/// Protocol and far-end tuple of a frame's flow: the destination of an
/// outbound frame, the source of an inbound one. The ICMP identifier is
/// left out as it differs between the two sides of a binding.
pub fn remote_endpoint(data: &[u8], outbound: bool) -> Option<(Protocol, Tuple)> {
    let layout = Layout::of(data).ok()?;
    let protocol = Protocol::from_ip_number(layout.ip_number)?;
    if data.len() < layout.l4 + min_l4_len(protocol) {
        return None;
    }
    let (addr_at, port_at) = if outbound {
        (IPV4_DST, L4_DST_PORT)
    } else {
        (IPV4_SRC, L4_SRC_PORT)
    };
    let addr = BigEndian::read_u32(&data[layout.l3 + addr_at..]);
    let port = match protocol {
        Protocol::Icmp => 0,
        Protocol::Tcp | Protocol::Udp => BigEndian::read_u16(&data[layout.l4 + port_at..]),
    };
    Some((protocol, Tuple::new(addr, port)))
}
