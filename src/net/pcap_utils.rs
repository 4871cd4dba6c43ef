//! Reading and writing the Ethernet captures replayed through the NAT.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use tracing::{debug, info};

use crate::nat::{NatError, NatResult};
use crate::utils::consts::PCAP_SNAPLEN;

/// An owned frame together with its capture timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(timestamp: Duration, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

pub fn open_capture<P: AsRef<Path>>(path: P) -> NatResult<PcapReader<BufReader<File>>> {
    let path = path.as_ref();
    let reader = capture_reader(BufReader::new(File::open(path)?))?;
    info!("Reading capture {}", path.display());
    Ok(reader)
}

/// Wraps any byte source, refusing captures that are not Ethernet.
pub fn capture_reader<R: Read>(src: R) -> NatResult<PcapReader<R>> {
    let reader = PcapReader::new(src)?;
    let datalink = reader.header().datalink;
    if datalink != DataLink::ETHERNET {
        return Err(NatError::Capture(format!(
            "unsupported link type {:?}, expected Ethernet",
            datalink
        )));
    }
    Ok(reader)
}

pub fn create_capture<P: AsRef<Path>>(path: P) -> NatResult<PcapWriter<BufWriter<File>>> {
    let path = path.as_ref();
    let writer = capture_writer(BufWriter::new(File::create(path)?))?;
    info!("Writing capture {}", path.display());
    Ok(writer)
}

pub fn capture_writer<W: Write>(dst: W) -> NatResult<PcapWriter<W>> {
    let header = PcapHeader {
        snaplen: PCAP_SNAPLEN,
        datalink: DataLink::ETHERNET,
        ..PcapHeader::default()
    };
    Ok(PcapWriter::with_header(dst, header)?)
}

/// Next frame of the capture, `None` at end of file.
pub fn next_frame<R: Read>(reader: &mut PcapReader<R>) -> NatResult<Option<CapturedFrame>> {
    match reader.next_packet() {
        Some(Ok(packet)) => {
            if packet.data.len() < packet.orig_len as usize {
                debug!(
                    "Frame truncated by capture: {} of {} bytes",
                    packet.data.len(),
                    packet.orig_len
                );
            }
            Ok(Some(CapturedFrame::new(
                packet.timestamp,
                packet.data.into_owned(),
            )))
        }
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

pub fn write_frame<W: Write>(writer: &mut PcapWriter<W>, frame: &CapturedFrame) -> NatResult<()> {
    let packet = PcapPacket::new(frame.timestamp, frame.data.len() as u32, &frame.data);
    writer.write_packet(&packet)?;
    Ok(())
}
