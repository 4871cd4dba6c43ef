use thiserror::Error;

use super::Protocol;

pub type NatResult<T> = Result<T, NatError>;

#[derive(Debug, Error)]
pub enum NatError {
    #[error("no free public {protocol} port left in the allocation range")]
    PortExhausted { protocol: Protocol },

    #[error("invalid NAT configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap_file::PcapError),

    #[error("capture file error: {0}")]
    Capture(String),
}
