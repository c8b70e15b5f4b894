//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use ipnetwork::Ipv4Network;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Instance;
use crate::neighbor;
use crate::network::{self, SendDestination, UdpIo};
use crate::output::{self, ResponseType};
use crate::packet::{Command, DecodeResult, Pdu, Rte};
use crate::route::{Route, RouteFlags, RouteStatus, RouteType};
use crate::tasks::{self, Scheduler};

// ===== UDP packet receipt =====

pub(crate) fn process_pdu<I>(
    instance: &mut Instance<I>,
    sched: &mut Scheduler,
    src: SocketAddrV4,
    ifindex: u32,
    ttl: u8,
    pdu: DecodeResult<Pdu>,
) where
    I: UdpIo,
{
    // The caller is responsible for mapping the packet to its arrival
    // interface; an unknown index means the glue layer is broken.
    let iface = instance
        .interfaces
        .get(ifindex)
        .expect("received packet on unknown interface");

    // Nothing received on an excluded interface is processed, and no reply
    // is ever sent to it.
    if iface.config.excluded {
        Error::UdpExcludedInterface(*src.ip(), ifindex).log();
        return;
    }

    // Discard our own multicasts looped back to us.
    if instance.interfaces.contains_local_addr(src.ip()) {
        Error::UdpSelfSourced(*src.ip()).log();
        return;
    }

    // Update or create new neighbor.
    let nbr = neighbor::update(
        &mut instance.state.neighbors,
        *src.ip(),
        instance.config.invalid_interval,
        sched,
    );

    match pdu {
        Ok(pdu) => {
            Debug::PduRx(ifindex, src.ip(), &pdu).log();

            // Update statistics.
            instance.state.statistics.update(pdu.command, false);

            match pdu.command {
                Command::Request => {
                    process_pdu_request(instance, src, ifindex, ttl, pdu);
                }
                Command::Response => {
                    process_pdu_response(
                        instance, sched, src, ifindex, ttl, pdu,
                    );
                }
            }
        }
        Err(error) => {
            // Update neighbor statistics.
            nbr.bad_packets_rcvd += 1;

            // Update interface statistics.
            if let Some(iface) = instance.interfaces.get_mut(ifindex) {
                iface.statistics.bad_packets_rcvd += 1;
                iface.statistics.update_discontinuity_time();
            }

            Error::UdpPduDecodeError(*src.ip(), error).log();
        }
    }
}

fn process_pdu_request<I>(
    instance: &mut Instance<I>,
    src: SocketAddrV4,
    ifindex: u32,
    ttl: u8,
    mut pdu: Pdu,
) where
    I: UdpIo,
{
    // If there are no entries, no response is given.
    if pdu.rtes.is_empty() {
        return;
    }

    // The response should be sent to the requestor's address and port.
    let dst = SendDestination::Unicast(src);

    // Check if it's a request to send the entire routing table.
    if pdu.is_dump_request() {
        // Whole-table requests must come from a directly attached neighbor.
        if ttl != network::TTL {
            Error::UdpWrongHopCount(*src.ip(), ttl).log();
            return;
        }

        // Reply through the socket bound to the arrival interface so the
        // source address is right even when the local address is used on
        // multiple interfaces.
        let socket = instance
            .interfaces
            .get(ifindex)
            .and_then(|iface| iface.socket)
            .expect("no send socket bound to the arrival interface");

        output::send_response(
            instance,
            ifindex,
            socket,
            dst,
            ResponseType::DumpReply,
        );
    } else {
        // Examine the list of RTEs in the Request one by one. For each entry,
        // look up the destination in the routing table and, if there is a
        // route, put that route's metric and tag in the RTE. If there is no
        // explicit route to the specified destination, put infinity in the
        // metric field. Once all the entries have been filled in, change the
        // command from Request to Response and send the datagram back to the
        // requestor.
        for rte in pdu.rtes.iter_mut() {
            if let Some(rte) = rte.as_route_mut() {
                match instance
                    .state
                    .routes
                    .get(&rte.prefix)
                    .filter(|route| route.status == RouteStatus::Valid)
                {
                    Some(route) => {
                        rte.metric = route.metric;
                        rte.tag = route.tag;
                    }
                    None => {
                        rte.metric.set_infinite();
                        rte.tag = 0;
                    }
                }
            }
        }
        pdu.command = Command::Response;

        // Off-link queries are answered through the receive socket.
        let socket = if ttl == network::TTL {
            instance
                .interfaces
                .get(ifindex)
                .and_then(|iface| iface.socket)
                .expect("no send socket bound to the arrival interface")
        } else {
            instance
                .state
                .recv_socket
                .expect("no receive socket")
        };

        output::send_pdu(instance, ifindex, socket, dst, pdu);
    }
}

// A Response can be received for one of several different reasons:
//
// - response to a specific query
// - regular update (unsolicited response)
// - triggered update caused by a route change
//
// Processing is the same no matter why the Response was generated.
fn process_pdu_response<I>(
    instance: &mut Instance<I>,
    sched: &mut Scheduler,
    src: SocketAddrV4,
    ifindex: u32,
    ttl: u8,
    pdu: Pdu,
) where
    I: UdpIo,
{
    // The Response must be ignored if it is not from the RIP port.
    if src.port() != network::UDP_PORT {
        return;
    }

    // Updates from a router that is not directly attached would have a
    // decremented TTL.
    if ttl != network::TTL {
        Error::UdpWrongHopCount(*src.ip(), ttl).log();
        return;
    }

    let cost = instance
        .interfaces
        .get(ifindex)
        .map(|iface| iface.config.cost)
        .unwrap();
    let invalid_interval = instance.config.invalid_interval;
    let flush_interval = instance.config.flush_interval;
    let gateway = Some(*src.ip());

    let mut changed = false;
    for rte in pdu.rtes.iter().filter_map(Rte::as_route) {
        // Update the metric by adding the cost of the network on which the
        // message arrived.
        let mut metric = rte.metric;
        metric.add(cost);

        // Normalize the advertised prefix.
        let prefix =
            Ipv4Network::new(rte.prefix.network(), rte.prefix.prefix())
                .unwrap();

        // Check if the route already exists in the routing table.
        match instance.state.routes.entry(prefix) {
            btree_map::Entry::Occupied(mut o) => {
                let route = o.get_mut();

                if metric.get() < route.metric.get() {
                    // Better route, take it. When the advertising router
                    // changed, the entry is replaced wholesale so no timer
                    // can alias the old learning.
                    Debug::RouteUpdate(&prefix, &gateway, &metric).log();

                    if route.gateway != gateway {
                        route.stop_timers(sched);
                        *route = Route::new(
                            prefix,
                            ifindex,
                            gateway,
                            metric,
                            rte.tag,
                            RouteType::Rip,
                        );
                    } else {
                        route.garbage_collection_stop(sched);
                        route.ifindex = ifindex;
                        route.metric = metric;
                        route.status = RouteStatus::Valid;
                        route.tag = rte.tag;
                        route.flags.insert(RouteFlags::CHANGED);
                    }
                    route.timeout_reset(invalid_interval, sched);
                    changed = true;
                } else if metric == route.metric {
                    if route.gateway == gateway {
                        // Reinitialize the route timeout.
                        if !metric.is_infinite() {
                            route.timeout_reset(invalid_interval, sched);
                            route.garbage_collection_stop(sched);
                        }
                    } else if !metric.is_infinite()
                        && route
                            .timeout_remaining(sched)
                            .unwrap_or(Duration::ZERO)
                            < invalid_interval / 2
                    {
                        // Equally good route from another router while the
                        // current one is halfway to expiring: switch to the
                        // fresher learning.
                        Debug::RouteUpdate(&prefix, &gateway, &metric).log();

                        route.stop_timers(sched);
                        *route = Route::new(
                            prefix,
                            ifindex,
                            gateway,
                            metric,
                            rte.tag,
                            RouteType::Rip,
                        );
                        route.timeout_reset(invalid_interval, sched);
                        changed = true;
                    }
                } else if route.gateway == gateway {
                    // The only router whose worse news may degrade the entry
                    // is the one currently providing it.
                    route.timeout_stop(sched);
                    if !metric.is_infinite() {
                        Debug::RouteUpdate(&prefix, &gateway, &metric).log();

                        route.garbage_collection_stop(sched);
                        route.metric = metric;
                        route.status = RouteStatus::Valid;
                        route.tag = rte.tag;
                        route.flags.insert(RouteFlags::CHANGED);
                        route.timeout_reset(invalid_interval, sched);
                    } else {
                        route.invalidate(flush_interval, sched);
                    }
                    changed = true;
                }
            }
            btree_map::Entry::Vacant(v) => {
                // Infinity for an unknown prefix carries no information.
                if metric.is_infinite() {
                    continue;
                }

                // Create new route.
                let mut route = Route::new(
                    prefix,
                    ifindex,
                    gateway,
                    metric,
                    rte.tag,
                    RouteType::Rip,
                );
                route.timeout_reset(invalid_interval, sched);
                v.insert(route);
                changed = true;
            }
        }
    }

    if changed {
        output::trigger_update(&instance.config, &mut instance.state, sched);
    }
}

// ===== instance initial request =====

pub(crate) fn process_initial_request<I>(
    instance: &mut Instance<I>,
    _sched: &mut Scheduler,
) where
    I: UdpIo,
{
    Debug::InitialRequest.log();
    instance.state.initial_request_timer = None;
    output::send_request_all(instance);
}

// ===== instance update interval =====

pub(crate) fn process_update_interval<I>(
    instance: &mut Instance<I>,
    sched: &mut Scheduler,
) where
    I: UdpIo,
{
    Debug::UpdateInterval.log();

    // A triggered update is suppressed when a regular update is due by the
    // time it would be sent.
    output::cancel_triggered_update(&mut instance.state, sched);

    output::send_response_all(instance, ResponseType::Unsolicited);

    // Reschedule with fresh jitter.
    let interval = instance.update_jitter();
    instance.state.update_interval_timer =
        Some(tasks::update_interval(sched, interval));
}

// ===== instance triggered update =====

pub(crate) fn process_triggered_update<I>(
    instance: &mut Instance<I>,
    sched: &mut Scheduler,
) where
    I: UdpIo,
{
    Debug::TriggeredUpdate.log();
    instance.state.triggered_upd_timer = None;

    // Flag clearing by interleaved updates can leave nothing to send here.
    // That is fine: the cooldown window has done its coalescing job.
    output::send_response_all(instance, ResponseType::Triggered);
}

// ===== neighbor timeout =====

pub(crate) fn process_nbr_timeout<I>(
    instance: &mut Instance<I>,
    addr: Ipv4Addr,
) where
    I: UdpIo,
{
    Debug::NbrTimeout(&addr).log();
    instance.state.neighbors.remove(&addr);
}

// ===== route timeout =====

pub(crate) fn process_route_timeout<I>(
    instance: &mut Instance<I>,
    sched: &mut Scheduler,
    prefix: Ipv4Network,
) where
    I: UdpIo,
{
    let route = match instance.state.routes.get_mut(&prefix) {
        Some(route) => route,
        None => return,
    };

    Debug::RouteTimeout(&prefix).log();
    route.invalidate(instance.config.flush_interval, sched);

    // Signal the output process to trigger an update.
    output::trigger_update(&instance.config, &mut instance.state, sched);
}

// ===== route garbage-collection timeout =====

pub(crate) fn process_route_gc_timeout<I>(
    instance: &mut Instance<I>,
    prefix: Ipv4Network,
) where
    I: UdpIo,
{
    let route = match instance.state.routes.get_mut(&prefix) {
        Some(route) => route,
        None => return,
    };
    if route.garbage_timer.is_none() {
        return;
    }

    Debug::RouteGcTimeout(&prefix).log();
    instance.state.routes.remove(&prefix);
}
