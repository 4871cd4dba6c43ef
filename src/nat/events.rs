//! Observability hooks for the translation core.
//!
//! The engine emits [`NatEvent`]s into an [`EventSink`]; what happens to them
//! (logging, counters, nothing) is up to the sink.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::Protocol;
use super::tuple::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Public side to private side.
    Ingress,
    /// Private side to public side.
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => f.write_str("ingress"),
            Direction::Egress => f.write_str("egress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Frame too short for the headers it claims to carry.
    Malformed,
    NotIpv4,
    UnsupportedProtocol,
    /// Inbound packet with no binding created by prior outbound traffic.
    NoBinding,
    /// Inbound packet hit a binding past the connection timeout.
    Expired,
    PortExhausted,
    /// Outbound packet already carrying the public address as its source.
    PublicSource,
}

impl DropReason {
    pub const ALL: [DropReason; 7] = [
        DropReason::Malformed,
        DropReason::NotIpv4,
        DropReason::UnsupportedProtocol,
        DropReason::NoBinding,
        DropReason::Expired,
        DropReason::PortExhausted,
        DropReason::PublicSource,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Malformed => "malformed",
            DropReason::NotIpv4 => "not IPv4",
            DropReason::UnsupportedProtocol => "unsupported protocol",
            DropReason::NoBinding => "no binding",
            DropReason::Expired => "binding expired",
            DropReason::PortExhausted => "port exhausted",
            DropReason::PublicSource => "source is the public address",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Ingress (or egress, when enabled) found the binding stale.
    Expired,
    /// The allocator took the port over for a new binding.
    Reclaimed,
    /// Removed by a periodic sweep.
    Swept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatEvent {
    BindingCreated {
        protocol: Protocol,
        private: Tuple,
        public: Tuple,
    },
    BindingEvicted {
        protocol: Protocol,
        private: Tuple,
        public: Tuple,
        reason: EvictReason,
    },
    PacketDropped {
        direction: Direction,
        protocol: Option<Protocol>,
        reason: DropReason,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &NatEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &NatEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &NatEvent) {
        match event {
            NatEvent::BindingCreated {
                protocol,
                private,
                public,
            } => info!("New {} binding {} -> {}", protocol, private, public),
            NatEvent::BindingEvicted {
                protocol,
                private,
                public,
                reason,
            } => info!(
                "Evicted {} binding {} -> {} ({:?})",
                protocol, private, public, reason
            ),
            NatEvent::PacketDropped {
                direction,
                protocol,
                reason,
            } => match protocol {
                Some(p) => debug!("Drop {} {} packet: {}", direction, p, reason),
                None => debug!("Drop {} packet: {}", direction, reason),
            },
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &NatEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub bindings_created: u64,
    pub bindings_evicted: u64,
    pub dropped: [u64; DropReason::ALL.len()],
}

impl CounterSnapshot {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason.index()]
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().sum()
    }
}

/// Diagnostic counters fed from the event stream.
#[derive(Debug, Default)]
pub struct NatCounters {
    bindings_created: AtomicU64,
    bindings_evicted: AtomicU64,
    dropped: [AtomicU64; DropReason::ALL.len()],
}

impl NatCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bindings_created: self
                .bindings_created
                .load(Ordering::Relaxed),
            bindings_evicted: self
                .bindings_evicted
                .load(Ordering::Relaxed),
            dropped: std::array::from_fn(|i| self.dropped[i].load(Ordering::Relaxed)),
        }
    }
}

impl EventSink for NatCounters {
    fn emit(&self, event: &NatEvent) {
        let counter = match event {
            NatEvent::BindingCreated { .. } => &self.bindings_created,
            NatEvent::BindingEvicted { .. } => &self.bindings_evicted,
            NatEvent::PacketDropped { reason, .. } => &self.dropped[reason.index()],
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_events() {
        let counters = NatCounters::new();
        let t = Tuple::new(1, 2);
        counters.emit(&NatEvent::BindingCreated {
            protocol: Protocol::Tcp,
            private: t,
            public: t,
        });
        counters.emit(&NatEvent::PacketDropped {
            direction: Direction::Ingress,
            protocol: Some(Protocol::Udp),
            reason: DropReason::NoBinding,
        });
        counters.emit(&NatEvent::PacketDropped {
            direction: Direction::Egress,
            protocol: None,
            reason: DropReason::NotIpv4,
        });

        let snap = counters.snapshot();
        assert_eq!(snap.bindings_created, 1);
        assert_eq!(snap.bindings_evicted, 0);
        assert_eq!(snap.dropped(DropReason::NoBinding), 1);
        assert_eq!(snap.dropped(DropReason::NotIpv4), 1);
        assert_eq!(snap.total_dropped(), 2);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(NatCounters::new());
        let b = Arc::new(NatCounters::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(Arc::new(TracingSink))
            .with(b.clone());

        fanout.emit(&NatEvent::PacketDropped {
            direction: Direction::Egress,
            protocol: Some(Protocol::Icmp),
            reason: DropReason::PortExhausted,
        });
        assert_eq!(a.snapshot().dropped(DropReason::PortExhausted), 1);
        assert_eq!(b.snapshot().dropped(DropReason::PortExhausted), 1);
    }
}
