//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use crate::instance::Instance;
use crate::network::UdpIo;
use crate::route::RouteStatus;

// Resolved next hop handed back to the datapath.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketRoute {
    pub destination: Ipv4Addr,
    pub source: Option<Ipv4Addr>,
    // None for directly connected destinations.
    pub gateway: Option<Ipv4Addr>,
    pub ifindex: u32,
}

// Verdict for a packet received by the datapath.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForwardAction {
    // The destination is one of our addresses.
    LocalDeliver,
    // Forward through the resolved route.
    Forward(PacketRoute),
    // Forwarding is administratively disabled on the input interface.
    NoRouteToHost,
    // Not ours to handle; the caller may try other routing protocols.
    Unhandled,
}

// ===== global functions =====

// Route an outbound packet, optionally restricted to an egress interface.
pub fn route_output<I>(
    instance: &Instance<I>,
    dst: Ipv4Addr,
    oif: Option<u32>,
) -> Option<PacketRoute>
where
    I: UdpIo,
{
    lookup(instance, dst, oif)
}

// Route a packet received on the given interface.
pub fn route_input<I>(
    instance: &Instance<I>,
    dst: Ipv4Addr,
    iif: u32,
) -> ForwardAction
where
    I: UdpIo,
{
    // Multicast forwarding is not supported; let other protocols try.
    if dst.is_multicast() {
        return ForwardAction::Unhandled;
    }

    // Weak end-system model: accept packets addressed to any of our
    // addresses, not just the ones assigned to the arrival interface.
    if instance.interfaces.contains_local_addr(&dst) {
        return ForwardAction::LocalDeliver;
    }

    let iface = instance
        .interfaces
        .get(iif)
        .expect("received packet on unknown interface");
    if !iface.forwarding {
        return ForwardAction::NoRouteToHost;
    }

    match lookup(instance, dst, None) {
        Some(route) => ForwardAction::Forward(route),
        None => ForwardAction::Unhandled,
    }
}

// Longest-prefix-match lookup over the valid routes.
fn lookup<I>(
    instance: &Instance<I>,
    dst: Ipv4Addr,
    oif: Option<u32>,
) -> Option<PacketRoute>
where
    I: UdpIo,
{
    // Sends to link-local multicast groups don't consult the table, but the
    // caller has to say which interface to use.
    if is_link_local_multicast(dst) {
        let oif = oif
            .expect("link-local multicast send without an egress interface");
        let iface = instance
            .interfaces
            .get(oif)
            .expect("link-local multicast send on unknown interface");
        return Some(PacketRoute {
            destination: dst,
            source: iface.global_address(dst),
            gateway: None,
            ifindex: oif,
        });
    }

    let mut best = None;
    let mut longest_mask = 0;
    for route in instance
        .state
        .routes
        .values()
        .filter(|route| route.status == RouteStatus::Valid)
    {
        if !route.prefix.contains(dst) {
            continue;
        }

        // If an egress interface is given, only routes through it qualify.
        if let Some(oif) = oif {
            if route.ifindex != oif {
                continue;
            }
        }

        if route.prefix.prefix() < longest_mask {
            continue;
        }
        longest_mask = route.prefix.prefix();
        best = Some(route);
    }

    best.map(|route| {
        let iface = instance.interfaces.get(route.ifindex);

        // Directly connected and ordinary routes pick the source covering
        // the route's destination; the default route says nothing about the
        // destination, so the original one selects the source.
        let selector = if route.gateway.is_some() && route.prefix.prefix() == 0
        {
            dst
        } else {
            route.prefix.ip()
        };

        PacketRoute {
            destination: route.prefix.ip(),
            source: iface.and_then(|iface| iface.global_address(selector)),
            gateway: route.gateway,
            ifindex: route.ifindex,
        }
    })
}

// 224.0.0.0/24, the link-local multicast block.
fn is_link_local_multicast(addr: Ipv4Addr) -> bool {
    u32::from(addr) & 0xffff_ff00 == 0xe000_0000
}
