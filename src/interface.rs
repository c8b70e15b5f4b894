//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::IoError;
use crate::network::{SocketHandle, UdpIo};

#[derive(Debug)]
pub struct Interface {
    pub ifindex: u32,
    // Operational status, driven by the interface observer.
    pub up: bool,
    // Whether the IP layer forwards packets received on this interface.
    pub forwarding: bool,
    // Addresses assigned to this interface. The first one is the primary
    // address the send socket binds to.
    pub addr_list: Vec<Ipv4Network>,
    pub config: InterfaceCfg,
    // Send socket bound to the primary address, port 520.
    pub socket: Option<SocketHandle>,
    // Message statistics.
    pub statistics: MessageStatistics,
}

#[derive(Debug)]
pub struct InterfaceCfg {
    // Excluded interfaces neither send nor accept RIP packets.
    pub excluded: bool,
    // Cost added to the metric of every route learned on this interface.
    pub cost: u8,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SplitHorizon {
    Disabled,
    Simple,
    PoisonReverse,
}

// Address classification used for source selection and for deciding which
// prefixes are advertiseable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressScope {
    Host,
    Link,
    Global,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub discontinuity_time: Option<DateTime<Utc>>,
    pub bad_packets_rcvd: u32,
    pub updates_sent: u32,
}

#[derive(Debug, Default)]
pub struct Interfaces {
    entries: BTreeMap<u32, Interface>,
}

// ===== impl Interface =====

impl Interface {
    fn new(ifindex: u32) -> Interface {
        Interface {
            ifindex,
            up: false,
            forwarding: true,
            addr_list: Vec::new(),
            config: InterfaceCfg::default(),
            socket: None,
            statistics: Default::default(),
        }
    }

    // Whether this interface participates in the protocol.
    pub(crate) fn is_active(&self) -> bool {
        self.up && !self.config.excluded
    }

    pub(crate) fn primary_addr(&self) -> Option<Ipv4Addr> {
        self.addr_list.first().map(|addr| addr.ip())
    }

    // Create or reuse the per-interface send socket.
    pub(crate) fn start<I>(&mut self, io: &mut I) -> Result<(), IoError>
    where
        I: UdpIo,
    {
        if self.socket.is_some() {
            return Ok(());
        }

        let addr = match self.primary_addr() {
            Some(addr) => addr,
            None => return Ok(()),
        };
        let socket = io
            .open_send_socket(self.ifindex, addr)
            .map_err(IoError::UdpSocketError)?;
        self.socket = Some(socket);

        Ok(())
    }

    // Close and drop the per-interface send socket.
    pub(crate) fn stop<I>(&mut self, io: &mut I)
    where
        I: UdpIo,
    {
        if let Some(socket) = self.socket.take() {
            io.close_socket(socket);
        }
    }

    // Checks if the given address is assigned to this interface.
    pub(crate) fn contains_addr(&self, addr: &Ipv4Addr) -> bool {
        self.addr_list.iter().any(|local| local.ip() == *addr)
    }

    // Select a GLOBAL-scope source address, preferring one on the same
    // subnet as the selector.
    pub(crate) fn global_address(
        &self,
        selector: Ipv4Addr,
    ) -> Option<Ipv4Addr> {
        let globals = || {
            self.addr_list
                .iter()
                .filter(|addr| address_scope(addr.ip()) == AddressScope::Global)
        };

        globals()
            .find(|addr| addr.contains(selector))
            .or_else(|| globals().next())
            .map(|addr| addr.ip())
    }
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            excluded: false,
            cost: 1,
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update_discontinuity_time(&mut self) {
        self.discontinuity_time = Some(Utc::now());
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn add(&mut self, ifindex: u32) -> &mut Interface {
        self.entries
            .entry(ifindex)
            .or_insert_with(|| Interface::new(ifindex))
    }

    pub fn get(&self, ifindex: u32) -> Option<&Interface> {
        self.entries.get(&ifindex)
    }

    pub(crate) fn get_mut(&mut self, ifindex: u32) -> Option<&mut Interface> {
        self.entries.get_mut(&ifindex)
    }

    // Checks if the given address is assigned to any local interface.
    pub(crate) fn contains_local_addr(&self, addr: &Ipv4Addr) -> bool {
        self.iter().any(|iface| iface.contains_addr(addr))
    }

    // Returns an iterator visiting all interfaces, ordered by ifindex.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Interface> + '_ {
        self.entries.values()
    }

    // Returns an iterator visiting all interfaces with mutable references.
    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &'_ mut Interface> + '_ {
        self.entries.values_mut()
    }
}

// ===== global functions =====

// Classify an address the way the IP layer does: loopback addresses have
// host scope, 169.254.0.0/16 has link scope, everything else is global.
pub(crate) fn address_scope(addr: Ipv4Addr) -> AddressScope {
    if addr.is_loopback() {
        AddressScope::Host
    } else if addr.is_link_local() {
        AddressScope::Link
    } else {
        AddressScope::Global
    }
}
