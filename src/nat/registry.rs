//! Per-protocol port usage registry.
//!
//! Every public port number has a slot recording which public address owns
//! it and when a packet last crossed the binding. Slots are atomics so the
//! per-packet refresh never takes the binding lock.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::Protocol;
use super::clock::Nanos;

pub const PORT_SLOTS: usize = u16::MAX as usize + 1;

#[derive(Debug, Default)]
pub struct PortSlot {
    /// Owning public address, 0 when the port is free.
    owner: AtomicU32,
    last_used: AtomicU64,
}

pub struct PortRegistry {
    slots: [Box<[PortSlot]>; Protocol::COUNT],
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| {
                (0..PORT_SLOTS)
                    .map(|_| PortSlot::default())
                    .collect()
            }),
        }
    }

    fn slot(&self, protocol: Protocol, port: u16) -> &PortSlot {
        &self.slots[protocol.index()][port as usize]
    }

    /// Marks `port` as owned by `addr`. Caller holds the binding lock.
    pub fn occupy(&self, protocol: Protocol, port: u16, addr: u32, now: Nanos) {
        let slot = self.slot(protocol, port);
        slot.last_used
            .store(now, Ordering::Relaxed);
        slot.owner
            .store(addr, Ordering::Release);
    }

    pub fn refresh(&self, protocol: Protocol, port: u16, now: Nanos) {
        self.slot(protocol, port)
            .last_used
            .fetch_max(now, Ordering::Relaxed);
    }

    /// Frees `port`. Caller holds the binding lock.
    pub fn clear(&self, protocol: Protocol, port: u16) {
        let slot = self.slot(protocol, port);
        slot.owner
            .store(0, Ordering::Release);
        slot.last_used
            .store(0, Ordering::Relaxed);
    }

    pub fn owner(&self, protocol: Protocol, port: u16) -> Option<u32> {
        match self
            .slot(protocol, port)
            .owner
            .load(Ordering::Acquire)
        {
            0 => None,
            addr => Some(addr),
        }
    }

    pub fn is_free(&self, protocol: Protocol, port: u16) -> bool {
        self.owner(protocol, port).is_none()
    }

    pub fn last_used(&self, protocol: Protocol, port: u16) -> Nanos {
        self.slot(protocol, port)
            .last_used
            .load(Ordering::Relaxed)
    }

    /// An occupied slot is expired once strictly more than `timeout` has
    /// passed since its last use. Free slots are never expired.
    pub fn is_expired(
        &self,
        protocol: Protocol,
        port: u16,
        now: Nanos,
        timeout: Nanos,
    ) -> bool {
        !self.is_free(protocol, port)
            && now.saturating_sub(self.last_used(protocol, port)) > timeout
    }

    pub fn active_count(&self, protocol: Protocol) -> usize {
        self.slots[protocol.index()]
            .iter()
            .filter(|s| s.owner.load(Ordering::Relaxed) != 0)
            .count()
    }

    /// Ports currently owned for `protocol`, in ascending order.
    pub fn occupied_ports(&self, protocol: Protocol) -> Vec<u16> {
        self.slots[protocol.index()]
            .iter()
            .enumerate()
            .filter(|(_, s)| s.owner.load(Ordering::Acquire) != 0)
            .map(|(port, _)| port as u16)
            .collect()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}
