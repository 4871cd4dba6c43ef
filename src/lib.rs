//! Stateful IPv4 NAPT engine.
//!
//! [`nat`] holds the connection tables and the two translators, [`net`]
//! the frame parsing, checksum stage and the capture replay pipeline.

pub mod nat;
pub mod net;
pub mod utils;
