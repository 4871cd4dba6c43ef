//! Binding creation, refresh and aging.
//!
//! Compound mutations (allocate + registry write + pair insert, and pair
//! removal + registry clear) run under one mutex which also owns the port
//! allocator. Lookups and [`ConnectionManager::touch`] stay outside of it:
//! a refresh racing with an eviction can be lost, which only matters for a
//! binding that was already past its timeout.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::Protocol;
use super::allocator::{PortAllocator, Reclaim};
use super::clock::{Clock, MonotonicClock, Nanos, duration_to_nanos};
use super::config::NatOptions;
use super::error::NatResult;
use super::events::{EventSink, EvictReason, NatEvent, TracingSink};
use super::registry::PortRegistry;
use super::table::SessionTables;
use super::tuple::Tuple;

/// A live binding as seen in a diagnostic snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub private: Tuple,
    pub public: Tuple,
    pub last_used: Nanos,
}

pub struct ConnectionManager {
    tables: SessionTables,
    registry: PortRegistry,
    allocator: Mutex<PortAllocator>,
    clock: Arc<dyn Clock>,
    timeout: Nanos,
    reclaim_expired: bool,
    events: Arc<dyn EventSink>,
}

impl ConnectionManager {
    pub fn new(
        options: &NatOptions,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            tables: SessionTables::new(),
            registry: PortRegistry::new(),
            allocator: Mutex::new(PortAllocator::new(options.port_range)),
            clock,
            timeout: duration_to_nanos(options.connection_timeout()),
            reclaim_expired: options.reclaim_expired,
            events,
        }
    }

    /// Manager on the monotonic clock, logging events through `tracing`.
    pub fn with_defaults(options: &NatOptions) -> Self {
        Self::new(
            options,
            Arc::new(MonotonicClock::new()),
            Arc::new(TracingSink),
        )
    }

    fn lock(&self) -> MutexGuard<'_, PortAllocator> {
        self.allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tables(&self) -> &SessionTables {
        &self.tables
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    pub fn now(&self) -> Nanos {
        self.clock.now()
    }

    pub fn lookup(&self, protocol: Protocol, key: &Tuple) -> Option<Tuple> {
        self.tables.lookup(protocol, key)
    }

    /// Creates the binding for a private tuple seen on egress and returns
    /// its public tuple. The only path that creates bindings.
    pub fn bind_egress(
        &self,
        protocol: Protocol,
        private: Tuple,
        public_addr: u32,
    ) -> NatResult<Tuple> {
        let mut allocator = self.lock();
        let now = self.clock.now();

        // Another worker may have bound this tuple while we waited
        if let Some(public) = self.tables.lookup(protocol, &private) {
            self.registry
                .refresh(protocol, public.port, now);
            return Ok(public);
        }

        let reclaim = self.reclaim_expired.then_some(Reclaim {
            now,
            timeout: self.timeout,
        });
        let allocation = allocator.allocate(protocol, &self.registry, reclaim)?;
        if allocation.reclaimed {
            self.evict_locked(protocol, allocation.port, EvictReason::Reclaimed);
        }

        let public = Tuple::new(public_addr, allocation.port);
        self.registry
            .occupy(protocol, public.port, public_addr, now);
        self.tables
            .insert_pair(protocol, private, public);
        drop(allocator);

        self.events
            .emit(&NatEvent::BindingCreated {
                protocol,
                private,
                public,
            });
        Ok(public)
    }

    /// Refreshes the activity timestamp of the binding on `port`.
    pub fn touch(&self, protocol: Protocol, port: u16) {
        self.registry
            .refresh(protocol, port, self.clock.now());
    }

    pub fn is_expired(&self, protocol: Protocol, port: u16) -> bool {
        self.registry
            .is_expired(protocol, port, self.clock.now(), self.timeout)
    }

    /// Returns `true` and refreshes the binding on `port` if it is still
    /// within the connection timeout; otherwise evicts it and returns
    /// `false`.
    pub fn check_and_evict(&self, protocol: Protocol, port: u16) -> bool {
        if self.registry.is_free(protocol, port) {
            return false;
        }
        let now = self.clock.now();
        if !self
            .registry
            .is_expired(protocol, port, now, self.timeout)
        {
            self.registry
                .refresh(protocol, port, now);
            return true;
        }

        let _guard = self.lock();
        if self.registry.is_free(protocol, port) {
            // Evicted by someone else while we waited
            return false;
        }
        if !self
            .registry
            .is_expired(protocol, port, self.clock.now(), self.timeout)
        {
            self.registry
                .refresh(protocol, port, now);
            return true;
        }
        self.evict_locked(protocol, port, EvictReason::Expired);
        false
    }

    /// Removes the binding rooted at public `port`, if any.
    pub fn evict(
        &self,
        protocol: Protocol,
        port: u16,
        reason: EvictReason,
    ) -> Option<Binding> {
        let _guard = self.lock();
        self.evict_locked(protocol, port, reason)
    }

    fn evict_locked(
        &self,
        protocol: Protocol,
        port: u16,
        reason: EvictReason,
    ) -> Option<Binding> {
        let owner = self.registry.owner(protocol, port)?;
        let last_used = self.registry.last_used(protocol, port);
        let public = Tuple::new(owner, port);
        let private = self
            .tables
            .remove_by_public(protocol, public);
        self.registry.clear(protocol, port);

        let Some(private) = private else {
            warn!(
                "{} port {} was registered without a session entry",
                protocol, port
            );
            return None;
        };
        self.events
            .emit(&NatEvent::BindingEvicted {
                protocol,
                private,
                public,
                reason,
            });
        Some(Binding {
            private,
            public,
            last_used,
        })
    }

    /// Evicts every expired binding across all protocols and returns how
    /// many were removed. Not used on the per-packet path.
    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        for protocol in Protocol::ALL {
            for port in self.registry.occupied_ports(protocol) {
                if !self.is_expired(protocol, port) {
                    continue;
                }
                let _guard = self.lock();
                if self.is_expired(protocol, port)
                    && self
                        .evict_locked(protocol, port, EvictReason::Swept)
                        .is_some()
                {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("Sweep evicted {} bindings", removed);
        }
        removed
    }

    pub fn active_bindings(&self, protocol: Protocol) -> usize {
        self.registry.active_count(protocol)
    }

    pub fn snapshot(&self, protocol: Protocol) -> Vec<Binding> {
        self.registry
            .occupied_ports(protocol)
            .into_iter()
            .filter_map(|port| {
                let owner = self.registry.owner(protocol, port)?;
                let public = Tuple::new(owner, port);
                let private = self.tables.lookup(protocol, &public)?;
                Some(Binding {
                    private,
                    public,
                    last_used: self.registry.last_used(protocol, port),
                })
            })
            .collect()
    }
}
