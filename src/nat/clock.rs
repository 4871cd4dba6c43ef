//! Time sources for connection aging.
//!
//! Timestamps are plain nanosecond counts so they fit in the atomics of the
//! port registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub type Nanos = u64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Nanos;
}

/// Monotonic clock measured from its own creation.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Nanos {
        duration_to_nanos(self.origin.elapsed())
    }
}

/// Hand-driven clock for deterministic aging tests and trace replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.now
            .store(duration_to_nanos(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Nanos {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn duration_to_nanos(d: Duration) -> Nanos {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
