//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{btree_map, BTreeMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::debug::Debug;
use crate::error::Error;
use crate::interface::{Interfaces, SplitHorizon};
use crate::neighbor::Neighbor;
use crate::network::{SocketHandle, UdpIo};
use crate::packet::{Command, Pdu};
use crate::route::{Metric, Route, RouteFlags, RouteStatus, RouteType};
use crate::tasks::messages::ProtocolMsg;
use crate::tasks::{self, Scheduler, TimerHandle};
use crate::{events, output};

#[derive(Debug)]
pub struct Instance<I: UdpIo> {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance interfaces.
    pub interfaces: Interfaces,
    // Instance state data.
    pub state: InstanceState,
    // UDP layer.
    pub io: I,
}

#[derive(Clone, Debug)]
pub struct InstanceCfg {
    // Interval between two unsolicited updates, jittered by up to +50%.
    pub update_interval: Duration,
    // Maximum random delay before the initial route request.
    pub startup_delay: Duration,
    // Delay before a silent route is invalidated.
    pub invalid_interval: Duration,
    // Delay before an invalidated route is deleted.
    pub flush_interval: Duration,
    // Triggered update cooldown bounds.
    pub triggered_update_min: Duration,
    pub triggered_update_max: Duration,
    // Split horizon strategy.
    pub split_horizon: SplitHorizon,
    // PRNG seed for the jitter sources. Fixed seeds make runs reproducible.
    pub seed: Option<u64>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Whether start() already ran. Interface notifications received before
    // that only mutate the RIB; socket setup is deferred.
    pub initialized: bool,
    // Receive socket bound to 0.0.0.0:520.
    pub recv_socket: Option<SocketHandle>,
    // Outbound update timers.
    pub initial_request_timer: Option<TimerHandle>,
    pub update_interval_timer: Option<TimerHandle>,
    // Pending coalesced triggered update.
    pub triggered_upd_timer: Option<TimerHandle>,
    // RIP neighbors.
    pub neighbors: BTreeMap<Ipv4Addr, Neighbor>,
    // RIP routing table.
    pub routes: BTreeMap<Ipv4Network, Route>,
    // Message statistics.
    pub statistics: MessageStatistics,
    // Jitter source.
    pub rng: SmallRng,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub discontinuity_time: Option<DateTime<Utc>>,
    pub requests_rcvd: u32,
    pub requests_sent: u32,
    pub responses_rcvd: u32,
    pub responses_sent: u32,
}

// ===== impl Instance =====

impl<I> Instance<I>
where
    I: UdpIo,
{
    pub fn new(name: String, config: InstanceCfg, io: I) -> Instance<I> {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };

        Instance {
            name,
            config,
            interfaces: Default::default(),
            state: InstanceState {
                initialized: false,
                recv_socket: None,
                initial_request_timer: None,
                update_interval_timer: None,
                triggered_upd_timer: None,
                neighbors: Default::default(),
                routes: Default::default(),
                statistics: Default::default(),
                rng,
            },
            io,
        }
    }

    // Start protocol operation: bind the receive socket, bring up the
    // per-interface send sockets, and arm the update timers.
    pub fn start(&mut self, sched: &mut Scheduler) {
        Debug::InstanceStart.log();

        // A RIP instance without its receive socket can't do anything
        // useful, so failure here is fatal.
        let recv_socket = self
            .io
            .open_recv_socket()
            .expect("failed to create receive socket");
        self.state.recv_socket = Some(recv_socket);
        self.state.initialized = true;

        // Create send sockets for the interfaces that came up before the
        // instance was started.
        let ifindexes = self
            .interfaces
            .iter()
            .filter(|iface| iface.is_active())
            .map(|iface| iface.ifindex)
            .collect::<Vec<_>>();
        for ifindex in ifindexes {
            self.interface_start(ifindex);
        }

        // Schedule the first unsolicited update.
        let interval = self.update_jitter();
        self.state.update_interval_timer =
            Some(tasks::update_interval(sched, interval));

        // Schedule the initial route request.
        let delay = Duration::from_secs_f64(
            self.state
                .rng
                .random_range(0.01..=self.config.startup_delay.as_secs_f64()),
        );
        self.state.initial_request_timer =
            Some(tasks::initial_request(sched, delay));
    }

    // Stop protocol operation and release every owned resource. Route and
    // neighbor timers are cancelled before their owners are dropped so no
    // callback can fire against a deleted entry.
    pub fn shutdown(&mut self, sched: &mut Scheduler) {
        Debug::InstanceShutdown.log();

        if let Some(timer) = self.state.initial_request_timer.take() {
            sched.cancel(timer);
        }
        if let Some(timer) = self.state.update_interval_timer.take() {
            sched.cancel(timer);
        }
        if let Some(timer) = self.state.triggered_upd_timer.take() {
            sched.cancel(timer);
        }

        for route in self.state.routes.values_mut() {
            route.stop_timers(sched);
        }
        self.state.routes.clear();

        for nbr in self.state.neighbors.values_mut() {
            nbr.stop_timers(sched);
        }
        self.state.neighbors.clear();

        for iface in self.interfaces.iter_mut() {
            iface.stop(&mut self.io);
        }
        if let Some(socket) = self.state.recv_socket.take() {
            self.io.close_socket(socket);
        }
        self.state.initialized = false;
    }

    // Process a timer event.
    pub fn process_protocol_msg(
        &mut self,
        sched: &mut Scheduler,
        msg: ProtocolMsg,
    ) {
        match msg {
            // Initial route request.
            ProtocolMsg::InitialRequest(_msg) => {
                events::process_initial_request(self, sched);
            }
            // Route update interval.
            ProtocolMsg::UpdateInterval(_msg) => {
                events::process_update_interval(self, sched);
            }
            // Triggered update cooldown has expired.
            ProtocolMsg::TriggeredUpdate(_msg) => {
                events::process_triggered_update(self, sched);
            }
            // Neighbor's timeout has expired.
            ProtocolMsg::NbrTimeout(msg) => {
                events::process_nbr_timeout(self, msg.addr);
            }
            // Route's timeout has expired.
            ProtocolMsg::RouteTimeout(msg) => {
                events::process_route_timeout(self, sched, msg.prefix);
            }
            // Route's garbage-collection timeout has expired.
            ProtocolMsg::RouteGcTimeout(msg) => {
                events::process_route_gc_timeout(self, msg.prefix);
            }
        }
    }

    // Process a datagram received on port 520. The caller provides the
    // arrival interface and the received IP TTL.
    pub fn process_packet(
        &mut self,
        sched: &mut Scheduler,
        src: SocketAddrV4,
        ifindex: u32,
        ttl: u8,
        data: &[u8],
    ) {
        let pdu = Pdu::decode(data);
        events::process_pdu(self, sched, src, ifindex, ttl, pdu);
    }

    // ===== interface observer =====

    pub fn add_interface(&mut self, ifindex: u32) {
        self.interfaces.add(ifindex);
    }

    pub fn set_interface_excluded(&mut self, ifindex: u32, excluded: bool) {
        let iface = self.interfaces.add(ifindex);
        iface.config.excluded = excluded;
    }

    // Interface costs of 16 or more would make every learned route
    // unreachable, so they are silently ignored.
    pub fn set_interface_cost(&mut self, ifindex: u32, cost: u8) {
        if cost >= Metric::INFINITE {
            return;
        }
        let iface = self.interfaces.add(ifindex);
        iface.config.cost = cost;
    }

    pub fn set_interface_forwarding(&mut self, ifindex: u32, enabled: bool) {
        let iface = self.interfaces.add(ifindex);
        iface.forwarding = enabled;
    }

    pub fn interface_up(&mut self, sched: &mut Scheduler, ifindex: u32) {
        Debug::InterfaceUp(ifindex).log();

        let iface = self.interfaces.add(ifindex);
        iface.up = true;
        let active = iface.is_active();
        let addr_list = iface.addr_list.clone();

        // Install the directly connected routes.
        for addr in addr_list {
            self.install_connected_route(sched, ifindex, addr);
        }

        if !self.state.initialized {
            return;
        }

        if active {
            self.interface_start(ifindex);
            output::trigger_update(&self.config, &mut self.state, sched);
        }
    }

    pub fn interface_down(&mut self, sched: &mut Scheduler, ifindex: u32) {
        Debug::InterfaceDown(ifindex).log();

        let iface = self.interfaces.add(ifindex);
        iface.up = false;
        iface.stop(&mut self.io);
        let excluded = iface.config.excluded;

        // Invalidate all routes that go through this interface.
        for route in self
            .state
            .routes
            .values_mut()
            .filter(|route| route.ifindex == ifindex)
        {
            route.invalidate(self.config.flush_interval, sched);
        }

        if !excluded {
            output::trigger_update(&self.config, &mut self.state, sched);
        }
    }

    pub fn address_add(
        &mut self,
        sched: &mut Scheduler,
        ifindex: u32,
        addr: Ipv4Network,
    ) {
        Debug::AddressAdd(ifindex, &addr).log();

        let iface = self.interfaces.add(ifindex);
        if !iface.addr_list.contains(&addr) {
            iface.addr_list.push(addr);
        }

        if !iface.up || iface.config.excluded {
            return;
        }

        self.install_connected_route(sched, ifindex, addr);
        output::trigger_update(&self.config, &mut self.state, sched);
    }

    pub fn address_remove(
        &mut self,
        sched: &mut Scheduler,
        ifindex: u32,
        addr: Ipv4Network,
    ) {
        Debug::AddressDelete(ifindex, &addr).log();

        let iface = self.interfaces.add(ifindex);
        iface.addr_list.retain(|local| *local != addr);
        let excluded = iface.config.excluded;

        if !iface.up {
            return;
        }

        // Invalidate the matching directly connected route.
        let prefix = connected_prefix(addr);
        if let Some(route) = self
            .state
            .routes
            .get_mut(&prefix)
            .filter(|route| route.ifindex == ifindex && route.gateway.is_none())
        {
            route.invalidate(self.config.flush_interval, sched);
        }

        if !excluded {
            output::trigger_update(&self.config, &mut self.state, sched);
        }
    }

    // Install a default route through the given next hop.
    pub fn add_default_route(
        &mut self,
        sched: &mut Scheduler,
        nexthop: Ipv4Addr,
        ifindex: u32,
    ) {
        let prefix = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap();
        self.install_local_route(
            sched,
            prefix,
            ifindex,
            Some(nexthop),
            RouteType::Static,
        );
    }

    // ===== helpers =====

    fn interface_start(&mut self, ifindex: u32) {
        if let Some(iface) = self.interfaces.get_mut(ifindex) {
            if let Err(error) = iface.start(&mut self.io) {
                Error::InterfaceStartError(ifindex, error).log();
            }
        }
    }

    fn install_connected_route(
        &mut self,
        sched: &mut Scheduler,
        ifindex: u32,
        addr: Ipv4Network,
    ) {
        // 0.0.0.0 and /0 masks can't produce a meaningful connected route.
        if addr.ip().is_unspecified() || addr.prefix() == 0 {
            return;
        }

        let prefix = connected_prefix(addr);
        self.install_local_route(
            sched,
            prefix,
            ifindex,
            None,
            RouteType::Connected,
        );
    }

    // Insert or refresh a locally originated route (directly connected or
    // injected). Local routes never age out, so no timeout is armed.
    fn install_local_route(
        &mut self,
        sched: &mut Scheduler,
        prefix: Ipv4Network,
        ifindex: u32,
        gateway: Option<Ipv4Addr>,
        route_type: RouteType,
    ) {
        let metric = Metric::from(1);

        match self.state.routes.entry(prefix) {
            btree_map::Entry::Occupied(mut o) => {
                let route = o.get_mut();
                Debug::RouteUpdate(&prefix, &gateway, &metric).log();

                route.stop_timers(sched);
                route.ifindex = ifindex;
                route.gateway = gateway;
                route.metric = metric;
                route.tag = 0;
                route.route_type = route_type;
                route.status = RouteStatus::Valid;
                route.flags.insert(RouteFlags::CHANGED);
            }
            btree_map::Entry::Vacant(v) => {
                let route = Route::new(
                    prefix, ifindex, gateway, metric, 0, route_type,
                );
                v.insert(route);
            }
        }
    }

    pub(crate) fn update_jitter(&mut self) -> Duration {
        let jitter = self.state.rng.random_range(
            0.0..=0.5 * self.config.update_interval.as_secs_f64(),
        );
        self.config.update_interval + Duration::from_secs_f64(jitter)
    }
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            update_interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(1),
            invalid_interval: Duration::from_secs(180),
            flush_interval: Duration::from_secs(120),
            triggered_update_min: Duration::from_secs(1),
            triggered_update_max: Duration::from_secs(5),
            split_horizon: SplitHorizon::PoisonReverse,
            seed: None,
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, command: Command, sent: bool) {
        self.discontinuity_time = Some(Utc::now());
        match (command, sent) {
            (Command::Request, false) => self.requests_rcvd += 1,
            (Command::Request, true) => self.requests_sent += 1,
            (Command::Response, false) => self.responses_rcvd += 1,
            (Command::Response, true) => self.responses_sent += 1,
        }
    }
}

// ===== global functions =====

// Network prefix covered by an interface address (host route for /32).
pub(crate) fn connected_prefix(addr: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(addr.network(), addr.prefix()).unwrap()
}
