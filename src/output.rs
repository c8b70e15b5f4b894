//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use itertools::Itertools;
use rand::Rng;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{Instance, InstanceCfg, InstanceState};
use crate::interface::{address_scope, AddressScope, SplitHorizon};
use crate::network::{self, SendDestination, SocketHandle, UdpIo};
use crate::packet::{Command, Pdu, Rte, RteIpv4};
use crate::route::{RouteFlags, RouteStatus};
use crate::tasks::{self, Scheduler};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseType {
    // Periodic update: all advertiseable entries, poisoned ones included.
    Unsolicited,
    // Out-of-cycle update: only entries flagged as changed.
    Triggered,
    // Reply to a whole-table request: valid entries only.
    DumpReply,
}

// ===== global functions =====

pub(crate) fn send_pdu<I>(
    instance: &mut Instance<I>,
    ifindex: u32,
    socket: SocketHandle,
    dst: SendDestination,
    pdu: Pdu,
) where
    I: UdpIo,
{
    // Log PDU being sent.
    Debug::PduTx(ifindex, &dst, &pdu).log();

    // Update instance statistics.
    instance.state.statistics.update(pdu.command, true);

    // Update interface statistics.
    if pdu.command == Command::Response {
        if let Some(iface) = instance.interfaces.get_mut(ifindex) {
            iface.statistics.updates_sent += 1;
            iface.statistics.update_discontinuity_time();
        }
    }

    // Send packet.
    if let Err(error) = network::send_packet(&mut instance.io, socket, dst, &pdu)
    {
        Error::from(error).log();
    }
}

// Ask all directly attached routers for their full routing tables.
pub(crate) fn send_request_all<I>(instance: &mut Instance<I>)
where
    I: UdpIo,
{
    let targets = instance
        .interfaces
        .iter()
        .filter(|iface| iface.is_active())
        .filter_map(|iface| {
            iface.socket.map(|socket| (iface.ifindex, socket))
        })
        .collect::<Vec<_>>();

    for (ifindex, socket) in targets {
        let pdu = Pdu::new_dump_request();
        send_pdu(instance, ifindex, socket, SendDestination::Multicast, pdu);
    }
}

pub(crate) fn send_response<I>(
    instance: &mut Instance<I>,
    ifindex: u32,
    socket: SocketHandle,
    dst: SendDestination,
    response_type: ResponseType,
) where
    I: UdpIo,
{
    let split_horizon = instance.config.split_horizon;

    // Build response RTEs.
    let mut rtes = vec![];
    for route in instance.state.routes.values() {
        // Skip unchanged routes for triggered updates.
        if response_type == ResponseType::Triggered
            && !route.flags.contains(RouteFlags::CHANGED)
        {
            continue;
        }

        // Whole-table replies carry only valid entries. Periodic and
        // triggered updates also advertise tombstoned entries so their
        // poisoned metric propagates.
        if response_type == ResponseType::DumpReply
            && route.status != RouteStatus::Valid
        {
            continue;
        }

        let is_default =
            route.prefix.prefix() == 0 && route.prefix.ip().is_unspecified();

        // A default route learned through this very interface must not be
        // advertised back out of it.
        if is_default && route.ifindex == ifindex {
            continue;
        }

        // Only global-scope prefixes and the default route are advertised.
        if !is_default
            && address_scope(route.prefix.ip()) != AddressScope::Global
        {
            continue;
        }

        // Split-horizon processing.
        let horizon = route.ifindex == ifindex;
        let mut metric = route.metric;
        match split_horizon {
            SplitHorizon::Disabled => (),
            SplitHorizon::Simple => {
                if horizon {
                    continue;
                }
            }
            SplitHorizon::PoisonReverse => {
                if horizon {
                    metric.set_infinite();
                }
            }
        }

        // Append RTE.
        rtes.push(Rte::Ipv4(RteIpv4 {
            tag: route.tag,
            prefix: route.prefix,
            nexthop: None,
            metric,
        }));
    }

    // Nothing to send.
    if rtes.is_empty() {
        return;
    }

    // Send as many PDUs as necessary.
    for rtes in rtes
        .into_iter()
        .chunks(Pdu::MAX_ENTRIES)
        .into_iter()
        .map(|chunk| chunk.collect())
    {
        let pdu = Pdu::new(Command::Response, rtes);
        send_pdu(instance, ifindex, socket, dst, pdu);
    }
}

pub(crate) fn send_response_all<I>(
    instance: &mut Instance<I>,
    response_type: ResponseType,
) where
    I: UdpIo,
{
    let targets = instance
        .interfaces
        .iter()
        .filter(|iface| iface.is_active())
        .filter_map(|iface| {
            iface.socket.map(|socket| (iface.ifindex, socket))
        })
        .collect::<Vec<_>>();

    for (ifindex, socket) in targets {
        send_response(
            instance,
            ifindex,
            socket,
            SendDestination::Multicast,
            response_type,
        );
    }

    // Clear the route change flags.
    for route in instance.state.routes.values_mut() {
        route.flags.remove(RouteFlags::CHANGED);
    }
}

// Request a triggered update. Requests arriving while one is already
// pending are coalesced into it.
pub(crate) fn trigger_update(
    config: &InstanceCfg,
    state: &mut InstanceState,
    sched: &mut Scheduler,
) {
    if state.triggered_upd_timer.is_some() {
        return;
    }

    let delay = Duration::from_secs_f64(state.rng.random_range(
        config.triggered_update_min.as_secs_f64()
            ..=config.triggered_update_max.as_secs_f64(),
    ));
    state.triggered_upd_timer = Some(tasks::triggered_update(sched, delay));
}

pub(crate) fn cancel_triggered_update(
    state: &mut InstanceState,
    sched: &mut Scheduler,
) {
    if let Some(timer) = state.triggered_upd_timer.take() {
        sched.cancel(timer);
    }
}
