//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, debug_span};

use crate::network::SendDestination;
use crate::packet::Pdu;
use crate::route::Metric;

// RIP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceShutdown,
    InterfaceUp(u32),
    InterfaceDown(u32),
    AddressAdd(u32, &'a Ipv4Network),
    AddressDelete(u32, &'a Ipv4Network),
    InitialRequest,
    UpdateInterval,
    TriggeredUpdate,
    PduRx(u32, &'a Ipv4Addr, &'a Pdu),
    PduTx(u32, &'a SendDestination, &'a Pdu),
    NbrCreate(&'a Ipv4Addr),
    NbrTimeout(&'a Ipv4Addr),
    RouteCreate(&'a Ipv4Network, &'a Option<Ipv4Addr>, &'a Metric),
    RouteUpdate(&'a Ipv4Network, &'a Option<Ipv4Addr>, &'a Metric),
    RouteTimeout(&'a Ipv4Network),
    RouteGcTimeout(&'a Ipv4Network),
    RouteInvalidate(&'a Ipv4Network),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceShutdown => {
                debug!("{}", self);
            }
            Debug::InterfaceUp(ifindex) | Debug::InterfaceDown(ifindex) => {
                debug_span!("interface", %ifindex).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::AddressAdd(ifindex, addr)
            | Debug::AddressDelete(ifindex, addr) => {
                debug_span!("interface", %ifindex).in_scope(|| {
                    debug!(address = %addr, "{}", self);
                });
            }
            Debug::InitialRequest
            | Debug::UpdateInterval
            | Debug::TriggeredUpdate => {
                debug!("{}", self);
            }
            Debug::PduRx(ifindex, source, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input", %ifindex, %source).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::PduTx(ifindex, _dst, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output", %ifindex).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::NbrCreate(addr) | Debug::NbrTimeout(addr) => {
                debug!(address = %addr, "{}", self);
            }
            Debug::RouteCreate(prefix, gateway, metric)
            | Debug::RouteUpdate(prefix, gateway, metric) => {
                let gateway = if let Some(gateway) = gateway {
                    gateway.to_string()
                } else {
                    "connected".to_owned()
                };
                debug!(%prefix, %gateway, metric = %metric.get(), "{}", self);
            }
            Debug::RouteTimeout(prefix)
            | Debug::RouteGcTimeout(prefix)
            | Debug::RouteInvalidate(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceShutdown => {
                write!(f, "shutting down instance")
            }
            Debug::InterfaceUp(..) => {
                write!(f, "interface up")
            }
            Debug::InterfaceDown(..) => {
                write!(f, "interface down")
            }
            Debug::AddressAdd(..) => {
                write!(f, "address added")
            }
            Debug::AddressDelete(..) => {
                write!(f, "address deleted")
            }
            Debug::InitialRequest => {
                write!(f, "initial request")
            }
            Debug::UpdateInterval => {
                write!(f, "update interval")
            }
            Debug::TriggeredUpdate => {
                write!(f, "triggered update")
            }
            Debug::PduRx(..) | Debug::PduTx(..) => {
                write!(f, "pdu")
            }
            Debug::NbrCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NbrTimeout(..) => {
                write!(f, "neighbor timed out")
            }
            Debug::RouteCreate(..) => {
                write!(f, "route created")
            }
            Debug::RouteUpdate(..) => {
                write!(f, "route updated")
            }
            Debug::RouteTimeout(..) => {
                write!(f, "route timed out")
            }
            Debug::RouteGcTimeout(..) => {
                write!(f, "route deleted")
            }
            Debug::RouteInvalidate(..) => {
                write!(f, "route invalidated")
            }
        }
    }
}
