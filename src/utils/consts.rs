/// Log level when RUST_LOG is unset
pub const LOG_LEVEL: &str = "info";

/// Idle time after which a binding may be evicted (seconds)
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 60;

/// First public port handed out by the allocator
pub const DEFAULT_PORT_FIRST: u16 = 1024;

/// Last public port handed out by the allocator (inclusive)
pub const DEFAULT_PORT_LAST: u16 = 65499;

/// Translation workers used by `napt replay`
pub const DEFAULT_WORKERS: usize = 1;

/// Frames buffered per worker before `submit` blocks
pub const WORKER_QUEUE_DEPTH: usize = 1024;

/// Snap length written into pcap headers
pub const PCAP_SNAPLEN: u32 = 65535;
