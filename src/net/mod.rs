pub mod checksum;
pub mod packet;
pub mod pcap_utils;
pub mod pipeline;
pub mod replay;

pub use packet::{Frame, ParseError};
pub use pcap_utils::CapturedFrame;
pub use pipeline::{Pipeline, PipelineReport};
pub use replay::{ReplayReport, replay_capture};
