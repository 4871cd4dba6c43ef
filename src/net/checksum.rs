//! Post-translation checksum stage.
//!
//! The translator rewrites addresses and ports without touching checksums;
//! this stage runs afterwards and recomputes the IPv4 header checksum and
//! the TCP/UDP (with pseudo header) or ICMP checksum.

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use super::packet::{Layout, ParseError};
use crate::nat::Protocol;

const IPV4_CHECKSUM: usize = 10;
const TCP_CHECKSUM: usize = 16;
const UDP_CHECKSUM: usize = 6;
const ICMP_CHECKSUM: usize = 2;

/// One's complement sum of 16-bit big-endian words, odd tail padded.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(BigEndian::read_u16(word) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum of `data` with the 16-bit field at `field` taken as zero.
fn checksum_skipping(data: &[u8], field: usize, initial: u32) -> u16 {
    let sum = sum_words(&data[..field], initial);
    fold(sum_words(&data[field + 2..], sum))
}

fn pseudo_header_sum(ip_header: &[u8], ip_number: u8, l4_len: usize) -> u32 {
    let sum = sum_words(&ip_header[12..20], 0);
    sum.wrapping_add(ip_number as u32)
        .wrapping_add(l4_len as u32)
}

fn l4_checksum_field(ip_number: u8) -> Option<usize> {
    match Protocol::from_ip_number(ip_number)? {
        Protocol::Tcp => Some(TCP_CHECKSUM),
        Protocol::Udp => Some(UDP_CHECKSUM),
        Protocol::Icmp => Some(ICMP_CHECKSUM),
    }
}

/// Expected L4 checksum, or `None` when the segment is too short to hold
/// its checksum field or the protocol is not one we handle.
fn expected_l4_checksum(data: &[u8], layout: &Layout) -> Option<u16> {
    let field = l4_checksum_field(layout.ip_number)?;
    if layout.l4_len < field + 2 {
        return None;
    }
    let segment = &data[layout.l4..layout.l4 + layout.l4_len];
    let initial = match Protocol::from_ip_number(layout.ip_number)? {
        Protocol::Icmp => 0,
        Protocol::Tcp | Protocol::Udp => pseudo_header_sum(
            &data[layout.l3..layout.l4],
            layout.ip_number,
            layout.l4_len,
        ),
    };
    let csum = checksum_skipping(segment, field, initial);
    // UDP transmits a computed zero as all ones
    if layout.ip_number == Protocol::Udp.ip_number() && csum == 0 {
        return Some(0xFFFF);
    }
    Some(csum)
}

/// Recomputes every checksum the frame carries.
pub fn update_checksums(data: &mut [u8]) -> Result<(), ParseError> {
    let layout = Layout::of(data)?;

    let ip_csum = checksum_skipping(&data[layout.l3..layout.l4], IPV4_CHECKSUM, 0);
    BigEndian::write_u16(&mut data[layout.l3 + IPV4_CHECKSUM..], ip_csum);

    match (l4_checksum_field(layout.ip_number), expected_l4_checksum(data, &layout)) {
        (Some(field), Some(csum)) => {
            BigEndian::write_u16(&mut data[layout.l4 + field..], csum);
        }
        (Some(_), None) => return Err(ParseError::Malformed),
        (None, _) => {
            debug!(
                "No transport checksum for IP protocol {}",
                layout.ip_number
            );
        }
    }
    Ok(())
}

/// Checks the IPv4 header checksum and, for TCP/UDP/ICMP, the transport
/// checksum. A UDP checksum of zero means "not computed" and is accepted.
pub fn verify_checksums(data: &[u8]) -> bool {
    let Ok(layout) = Layout::of(data) else {
        return false;
    };

    let header = &data[layout.l3..layout.l4];
    let stored = BigEndian::read_u16(&header[IPV4_CHECKSUM..]);
    if checksum_skipping(header, IPV4_CHECKSUM, 0) != stored {
        debug!("IPv4 header checksum mismatch");
        return false;
    }

    let Some(field) = l4_checksum_field(layout.ip_number) else {
        return true;
    };
    let Some(expected) = expected_l4_checksum(data, &layout) else {
        return false;
    };
    let stored = BigEndian::read_u16(&data[layout.l4 + field..]);
    if layout.ip_number == Protocol::Udp.ip_number() && stored == 0 {
        return true;
    }
    if stored != expected {
        debug!(
            "Transport checksum mismatch: {:#06x}, should be {:#06x}",
            stored, expected
        );
        return false;
    }
    true
}
