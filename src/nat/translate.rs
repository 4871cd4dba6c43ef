//! Ingress and egress translators.
//!
//! Both entry points take a raw Ethernet frame, rewrite it in place and
//! return whether the pipeline should forward it. Nothing here fails: every
//! unsupported or unknown packet turns into a drop verdict.

use std::sync::Arc;

use tracing::{debug, trace};

use super::config::NatConfig;
use super::error::NatResult;
use super::events::{Direction, DropReason, EvictReason, NatEvent};
use super::lifecycle::ConnectionManager;
use super::tuple::Tuple;
use super::Protocol;
use crate::net::packet::{Frame, ParseError, frame_dst_mac};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop(DropReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

impl From<ParseError> for DropReason {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Malformed => DropReason::Malformed,
            ParseError::NotIpv4 => DropReason::NotIpv4,
            ParseError::UnsupportedProtocol(_) => DropReason::UnsupportedProtocol,
        }
    }
}

pub struct Translator {
    config: NatConfig,
    manager: Arc<ConnectionManager>,
    public_addr: u32,
}

impl Translator {
    pub fn new(config: NatConfig, manager: Arc<ConnectionManager>) -> NatResult<Self> {
        config.validate()?;
        let public_addr = u32::from(config.public_address());
        Ok(Self {
            config,
            manager,
            public_addr,
        })
    }

    /// Translator with its own manager on the monotonic clock, logging
    /// events through `tracing`.
    pub fn from_config(config: NatConfig) -> NatResult<Self> {
        let manager = Arc::new(ConnectionManager::with_defaults(&config.options));
        Self::new(config, manager)
    }

    pub fn config(&self) -> &NatConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Tells which port a frame arrived on from its destination MAC.
    pub fn classify(&self, frame: &[u8]) -> Option<Direction> {
        let dst = frame_dst_mac(frame)?;
        if dst == self.config.private_port.mac {
            Some(Direction::Egress)
        } else if dst == self.config.public_port.mac {
            Some(Direction::Ingress)
        } else {
            None
        }
    }

    pub fn translate(&self, direction: Direction, frame: &mut [u8]) -> Verdict {
        match direction {
            Direction::Ingress => self.ingress(frame),
            Direction::Egress => self.egress(frame),
        }
    }

    pub fn translate_ingress(&self, frame: &mut [u8]) -> bool {
        self.ingress(frame).is_accept()
    }

    pub fn translate_egress(&self, frame: &mut [u8]) -> bool {
        self.egress(frame).is_accept()
    }

    fn reject(
        &self,
        direction: Direction,
        protocol: Option<Protocol>,
        reason: DropReason,
    ) -> Verdict {
        self.manager
            .events()
            .emit(&NatEvent::PacketDropped {
                direction,
                protocol,
                reason,
            });
        Verdict::Drop(reason)
    }

    /// Public to private. Only bindings created by earlier egress traffic
    /// let packets in.
    pub fn ingress(&self, data: &mut [u8]) -> Verdict {
        let mut frame = match Frame::parse(data) {
            Ok(frame) => frame,
            Err(err) => return self.reject(Direction::Ingress, None, err.into()),
        };
        let protocol = frame.protocol();
        let key = frame.destination();

        // Keys on other addresses could only match the private half of a pair
        let mapped = if key.addr == self.public_addr {
            self.manager.lookup(protocol, &key)
        } else {
            None
        };
        let Some(private) = mapped else {
            trace!("Ingress {} key {} not found", protocol, key);
            return self.reject(Direction::Ingress, Some(protocol), DropReason::NoBinding);
        };

        if !self.manager.check_and_evict(protocol, key.port) {
            debug!("Ingress {} key {} hit an expired binding", protocol, key);
            return self.reject(Direction::Ingress, Some(protocol), DropReason::Expired);
        }

        let port = &self.config.private_port;
        frame.set_dst_mac(port.dst_mac);
        frame.set_src_mac(port.mac);
        frame.set_dst_addr(private.addr);
        frame.set_dst_port(private.port);
        trace!("Ingress {} {} -> {}", protocol, key, private);
        Verdict::Accept
    }

    /// Private to public. Creates the binding on first sight of a private
    /// tuple and refreshes it afterwards.
    pub fn egress(&self, data: &mut [u8]) -> Verdict {
        let mut frame = match Frame::parse(data) {
            Ok(frame) => frame,
            Err(err) => return self.reject(Direction::Egress, None, err.into()),
        };
        let protocol = frame.protocol();
        let key = frame.source();

        // Would match the public half of a binding
        if key.addr == self.public_addr {
            debug!("Egress {} source {} is already public", protocol, key);
            return self.reject(Direction::Egress, Some(protocol), DropReason::PublicSource);
        }

        let public = match self.manager.lookup(protocol, &key) {
            Some(public)
                if self.config.options.age_check_on_egress
                    && self.manager.is_expired(protocol, public.port) =>
            {
                self.manager
                    .evict(protocol, public.port, EvictReason::Expired);
                self.bind(protocol, key)
            }
            Some(public) => {
                self.manager.touch(protocol, public.port);
                Some(public)
            }
            None => self.bind(protocol, key),
        };
        let Some(public) = public else {
            return self.reject(Direction::Egress, Some(protocol), DropReason::PortExhausted);
        };

        let port = &self.config.public_port;
        frame.set_dst_mac(port.dst_mac);
        frame.set_src_mac(port.mac);
        frame.set_src_addr(public.addr);
        frame.set_src_port(public.port);
        trace!("Egress {} {} -> {}", protocol, key, public);
        Verdict::Accept
    }

    fn bind(&self, protocol: Protocol, private: Tuple) -> Option<Tuple> {
        match self
            .manager
            .bind_egress(protocol, private, self.public_addr)
        {
            Ok(public) => Some(public),
            Err(err) => {
                debug!("Cannot bind {} {}: {}", protocol, private, err);
                None
            }
        }
    }
}
