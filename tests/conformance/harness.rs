//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use bytes::Bytes;
use ipnetwork::Ipv4Network;
use rip_agent::instance::{Instance, InstanceCfg};
use rip_agent::network::{SocketHandle, UdpIo, UDP_PORT};
use rip_agent::packet::{Command, Pdu, Rte, RteIpv4};
use rip_agent::route::{Metric, RouteStatus, RouteType};
use rip_agent::tasks::Scheduler;

// In-memory UDP layer recording everything the agent transmits.
#[derive(Debug, Default)]
pub struct StubIo {
    next_socket: u64,
    pub sockets: HashMap<SocketHandle, SocketMeta>,
    pub sent: Vec<Datagram>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketMeta {
    Send { ifindex: u32, addr: Ipv4Addr },
    Recv,
}

#[derive(Clone, Debug)]
pub struct Datagram {
    pub meta: SocketMeta,
    pub dst: SocketAddrV4,
    pub ttl: u8,
    pub data: Bytes,
}

impl StubIo {
    fn alloc(&mut self, meta: SocketMeta) -> SocketHandle {
        let socket = SocketHandle(self.next_socket);
        self.next_socket += 1;
        self.sockets.insert(socket, meta);
        socket
    }
}

impl UdpIo for StubIo {
    fn open_send_socket(
        &mut self,
        ifindex: u32,
        addr: Ipv4Addr,
    ) -> Result<SocketHandle, std::io::Error> {
        Ok(self.alloc(SocketMeta::Send { ifindex, addr }))
    }

    fn open_recv_socket(&mut self) -> Result<SocketHandle, std::io::Error> {
        Ok(self.alloc(SocketMeta::Recv))
    }

    fn close_socket(&mut self, socket: SocketHandle) {
        self.sockets.remove(&socket);
    }

    fn send(
        &mut self,
        socket: SocketHandle,
        dst: SocketAddrV4,
        ttl: u8,
        data: Bytes,
    ) -> Result<(), std::io::Error> {
        let meta = *self.sockets.get(&socket).expect("send on closed socket");
        self.sent.push(Datagram {
            meta,
            dst,
            ttl,
            data,
        });
        Ok(())
    }
}

// One simulated router: an agent plus its event scheduler.
pub struct Node {
    pub agent: Instance<StubIo>,
    pub sched: Scheduler,
}

impl Node {
    pub fn recv(
        &mut self,
        src: SocketAddrV4,
        ifindex: u32,
        ttl: u8,
        data: &[u8],
    ) {
        self.agent
            .process_packet(&mut self.sched, src, ifindex, ttl, data);
    }

    pub fn run_until(&mut self, t: Duration) {
        while let Some(msg) = self.sched.poll(t) {
            self.agent.process_protocol_msg(&mut self.sched, msg);
        }
    }

    // Drain and decode everything sent so far.
    pub fn sent_pdus(&mut self) -> Vec<(SocketMeta, SocketAddrV4, Pdu)> {
        self.agent
            .io
            .sent
            .drain(..)
            .map(|dg| (dg.meta, dg.dst, Pdu::decode(&dg.data).unwrap()))
            .collect()
    }

    pub fn sent_responses(&mut self) -> Vec<(SocketMeta, SocketAddrV4, Pdu)> {
        self.sent_pdus()
            .into_iter()
            .filter(|(_, _, pdu)| pdu.command == Command::Response)
            .collect()
    }
}

// Build a started node with the given addressed interfaces.
pub fn node(seed: u64, ifaces: &[(u32, Ipv4Network)]) -> Node {
    let config = InstanceCfg {
        seed: Some(seed),
        ..Default::default()
    };
    let mut agent = Instance::new(format!("rt-{}", seed), config, StubIo::default());
    let mut sched = Scheduler::new();

    for (ifindex, addr) in ifaces {
        agent.address_add(&mut sched, *ifindex, *addr);
        agent.interface_up(&mut sched, *ifindex);
    }
    agent.start(&mut sched);

    Node { agent, sched }
}

// Point-to-point network of nodes with zero-delay links.
#[derive(Default)]
pub struct Sim {
    pub nodes: Vec<Node>,
    links: Vec<((usize, u32), (usize, u32))>,
}

impl Sim {
    pub fn new() -> Sim {
        Default::default()
    }

    pub fn add_node(&mut self, seed: u64) -> usize {
        let config = InstanceCfg {
            seed: Some(seed),
            ..Default::default()
        };
        let agent =
            Instance::new(format!("rt-{}", seed), config, StubIo::default());
        self.nodes.push(Node {
            agent,
            sched: Scheduler::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_iface(&mut self, node: usize, ifindex: u32, addr: Ipv4Network) {
        let node = &mut self.nodes[node];
        node.agent.address_add(&mut node.sched, ifindex, addr);
        node.agent.interface_up(&mut node.sched, ifindex);
    }

    pub fn set_cost(&mut self, node: usize, ifindex: u32, cost: u8) {
        self.nodes[node].agent.set_interface_cost(ifindex, cost);
    }

    pub fn link(&mut self, a: (usize, u32), b: (usize, u32)) {
        self.links.push((a, b));
    }

    pub fn unlink(&mut self, end: (usize, u32)) {
        self.links.retain(|(a, b)| *a != end && *b != end);
    }

    pub fn iface_down(&mut self, node: usize, ifindex: u32) {
        let node = &mut self.nodes[node];
        node.agent.interface_down(&mut node.sched, ifindex);
    }

    pub fn start(&mut self) {
        for node in self.nodes.iter_mut() {
            node.agent.start(&mut node.sched);
        }
        self.flush();
    }

    // Run every node's scheduler up to the given virtual time, delivering
    // packets as they are sent. Nodes interleave in deadline order.
    pub fn run_until(&mut self, t: Duration) {
        loop {
            self.flush();

            let mut next: Option<(usize, Duration)> = None;
            for (i, node) in self.nodes.iter_mut().enumerate() {
                if let Some(deadline) = node.sched.next_deadline() {
                    if deadline <= t
                        && next.is_none_or(|(_, best)| deadline < best)
                    {
                        next = Some((i, deadline));
                    }
                }
            }
            let Some((i, _)) = next else { break };

            let node = &mut self.nodes[i];
            if let Some(msg) = node.sched.poll(t) {
                node.agent.process_protocol_msg(&mut node.sched, msg);
            }
        }
        self.flush();
    }

    // Deliver queued datagrams until the network is quiescent.
    fn flush(&mut self) {
        loop {
            let mut any = false;
            for i in 0..self.nodes.len() {
                let outgoing = self.nodes[i]
                    .agent
                    .io
                    .sent
                    .drain(..)
                    .collect::<Vec<_>>();
                for dg in outgoing {
                    any = true;
                    self.deliver(i, dg);
                }
            }
            if !any {
                break;
            }
        }
    }

    fn deliver(&mut self, from: usize, dg: Datagram) {
        // Replies through the receive socket are off-link; nothing in the
        // simulated topologies consumes them.
        let SocketMeta::Send { ifindex, addr } = dg.meta else {
            return;
        };

        // Find the link peer; sends on stub interfaces go nowhere.
        let Some((to, to_ifindex)) = self.links.iter().find_map(|(a, b)| {
            if *a == (from, ifindex) {
                Some(*b)
            } else if *b == (from, ifindex) {
                Some(*a)
            } else {
                None
            }
        }) else {
            return;
        };

        let node = &mut self.nodes[to];

        // Unicasts must be addressed to the receiving node.
        if !dg.dst.ip().is_multicast() {
            let local = node
                .agent
                .interfaces
                .iter()
                .any(|iface| {
                    iface.addr_list.iter().any(|a| a.ip() == *dg.dst.ip())
                });
            if !local {
                return;
            }
        }

        let src = SocketAddrV4::new(addr, UDP_PORT);
        node.recv(src, to_ifindex, dg.ttl, &dg.data);
    }
}

// Encode a Response carrying the given (prefix, metric) advertisements.
pub fn response(rtes: &[(Ipv4Network, u8)]) -> Vec<u8> {
    let rtes = rtes
        .iter()
        .map(|(prefix, metric)| {
            Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: *prefix,
                nexthop: None,
                metric: Metric::from(*metric),
            })
        })
        .collect();
    Pdu::new(Command::Response, rtes).encode().to_vec()
}

// Structural invariants that must hold after every scheduler step.
pub fn check_invariants(node: &Node) {
    for (prefix, route) in &node.agent.state.routes {
        assert_eq!(*prefix, route.prefix);
        assert!((1..=16).contains(&route.metric.get()));

        match route.status {
            RouteStatus::Valid => {
                // Locally originated routes never age out.
                if route.route_type == RouteType::Rip {
                    assert!(route.timeout_timer.is_some());
                }
                assert!(route.garbage_timer.is_none());
            }
            RouteStatus::Invalid => {
                assert!(route.metric.is_infinite());
                assert!(route.garbage_timer.is_some());
                assert!(route.timeout_timer.is_none());
            }
        }
    }
}
