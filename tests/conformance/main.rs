//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod harness;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use const_addrs::{ip4, net4};
use ipnetwork::Ipv4Network;
use rip_agent::network::UDP_PORT;
use rip_agent::packet::{Command, Pdu, Rte, RteIpv4};
use rip_agent::route::{Metric, RouteFlags, RouteStatus};

use crate::harness::{check_invariants, node, response, Sim};

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

//
// A --- B --- C, all link costs 1.
//
// After one update interval everything has converged: A reaches C's
// directly connected network with metric 2 through B, and vice versa.
//
#[test]
fn two_hop_convergence() {
    let mut sim = Sim::new();
    let a = sim.add_node(1);
    let b = sim.add_node(2);
    let c = sim.add_node(3);

    sim.add_iface(a, 1, net4!("10.0.1.1/24"));
    sim.add_iface(b, 1, net4!("10.0.1.2/24"));
    sim.add_iface(b, 2, net4!("10.0.2.1/24"));
    sim.add_iface(c, 1, net4!("10.0.2.2/24"));
    sim.link((a, 1), (b, 1));
    sim.link((b, 2), (c, 1));

    sim.start();
    sim.run_until(secs(31));

    let route = &sim.nodes[a].agent.state.routes[&net4!("10.0.2.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 2);
    assert_eq!(route.gateway, Some(ip4!("10.0.1.2")));
    assert_eq!(route.ifindex, 1);

    let route = &sim.nodes[c].agent.state.routes[&net4!("10.0.1.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 2);
    assert_eq!(route.gateway, Some(ip4!("10.0.2.1")));

    for node in &sim.nodes {
        check_invariants(node);
    }
}

//
//     A
//    / \          B --- D --- (stub)
//   B---C          \   /
//                   (D)
//
// Full topology: A-B, A-C, B-C, B-D, C-D, plus a stub network on D.
// The C-D link carries an interface metric of 10 on both ends.
//
fn diamond() -> (Sim, usize, usize, usize, usize) {
    let mut sim = Sim::new();
    let a = sim.add_node(10);
    let b = sim.add_node(20);
    let c = sim.add_node(30);
    let d = sim.add_node(40);

    sim.add_iface(a, 1, net4!("10.0.1.1/24"));
    sim.add_iface(a, 2, net4!("10.0.2.1/24"));
    sim.add_iface(b, 1, net4!("10.0.1.2/24"));
    sim.add_iface(b, 2, net4!("10.0.3.1/24"));
    sim.add_iface(b, 3, net4!("10.0.4.1/24"));
    sim.add_iface(c, 1, net4!("10.0.2.2/24"));
    sim.add_iface(c, 2, net4!("10.0.3.2/24"));
    sim.add_iface(c, 3, net4!("10.0.5.1/24"));
    sim.add_iface(d, 1, net4!("10.0.4.2/24"));
    sim.add_iface(d, 2, net4!("10.0.5.2/24"));
    sim.add_iface(d, 3, net4!("10.0.99.1/24"));

    sim.link((a, 1), (b, 1));
    sim.link((a, 2), (c, 1));
    sim.link((b, 2), (c, 2));
    sim.link((b, 3), (d, 1));
    sim.link((c, 3), (d, 2));

    // Expensive C-D link.
    sim.set_cost(c, 3, 10);
    sim.set_cost(d, 2, 10);

    (sim, a, b, c, d)
}

//
// The interface metric override steers A's route to the stub network
// through B (1+1+1) rather than through the cheaper-looking-but-costed
// C-D link (1+10+1).
//
#[test]
fn interface_metric_override() {
    let (mut sim, a, _, _, _) = diamond();
    sim.start();
    sim.run_until(secs(35));

    let route = &sim.nodes[a].agent.state.routes[&net4!("10.0.99.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 3);
    assert_eq!(route.gateway, Some(ip4!("10.0.1.2")));

    for node in &sim.nodes {
        check_invariants(node);
    }
}

//
// Killing the B-D link invalidates B's routes through it, the poisoned
// prefixes propagate via triggered updates, and the network reconverges on
// the expensive path through C.
//
#[test]
fn link_failure_and_recovery() {
    let (mut sim, a, b, _, d) = diamond();
    sim.start();
    sim.run_until(secs(40));

    // Take B <-> D down on both ends.
    sim.iface_down(b, 3);
    sim.iface_down(d, 1);
    sim.run_until(secs(250));

    let route = &sim.nodes[a].agent.state.routes[&net4!("10.0.99.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 12);
    assert_eq!(route.gateway, Some(ip4!("10.0.2.2")));

    let route = &sim.nodes[b].agent.state.routes[&net4!("10.0.99.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 12);
    assert_eq!(route.gateway, Some(ip4!("10.0.3.2")));

    for node in &sim.nodes {
        check_invariants(node);
    }
}

//
// A whole-table request against a 60-entry table is answered with three
// paginated unicast Responses, split horizon applied on the reply path.
//
#[test]
fn whole_table_request_pagination() {
    let mut node = node(7, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    // Teach the node 59 routes, 25 RTEs at a time.
    let prefixes = (0..59u8)
        .map(|i| {
            Ipv4Network::new(Ipv4Addr::new(10, 1, i, 0), 24).unwrap()
        })
        .collect::<Vec<_>>();
    for chunk in prefixes.chunks(25) {
        let rtes = chunk.iter().map(|prefix| (*prefix, 1)).collect::<Vec<_>>();
        node.recv(peer, 1, 255, &response(&rtes));
    }
    assert_eq!(node.agent.state.routes.len(), 60);
    node.agent.io.sent.clear();

    // Whole-table request from another attached router.
    let requester = SocketAddrV4::new(ip4!("10.0.0.7"), UDP_PORT);
    node.recv(requester, 1, 255, &Pdu::new_dump_request().encode());

    let replies = node.sent_pdus();
    assert_eq!(replies.len(), 3);
    let sizes = replies
        .iter()
        .map(|(_, _, pdu)| pdu.rtes.len())
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![25, 25, 10]);
    for (_, dst, pdu) in &replies {
        assert_eq!(*dst, requester);
        assert_eq!(pdu.command, Command::Response);

        // Everything in the table was learned through (or is connected to)
        // the arrival interface, so poison reverse rewrites every metric.
        for rte in &pdu.rtes {
            assert!(rte.as_route().unwrap().metric.is_infinite());
        }
    }

    check_invariants(&node);
}

//
// A specific-prefix query gets the installed metric for known prefixes and
// infinity for unknown ones.
//
#[test]
fn specific_prefix_request() {
    let mut node = node(8, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    node.recv(peer, 1, 255, &response(&[(net4!("10.0.1.0/24"), 4)]));
    node.agent.io.sent.clear();

    let query = Pdu::new(
        Command::Request,
        vec![
            Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: net4!("10.0.1.0/24"),
                nexthop: None,
                metric: Metric::from(Metric::INFINITE),
            }),
            Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: net4!("10.9.9.0/24"),
                nexthop: None,
                metric: Metric::from(Metric::INFINITE),
            }),
        ],
    );
    let requester = SocketAddrV4::new(ip4!("10.0.0.2"), 3000);
    node.recv(requester, 1, 255, &query.encode());

    let replies = node.sent_pdus();
    assert_eq!(replies.len(), 1);
    let (_, dst, pdu) = &replies[0];
    assert_eq!(*dst, requester);
    assert_eq!(pdu.command, Command::Response);
    assert_eq!(pdu.rtes.len(), 2);
    assert_eq!(pdu.rtes[0].as_route().unwrap().metric.get(), 5);
    assert!(pdu.rtes[1].as_route().unwrap().metric.is_infinite());
    assert_eq!(pdu.rtes[1].as_route().unwrap().tag, 0);
}

//
// Several RIB changes inside the cooldown window coalesce into a single
// triggered update.
//
#[test]
fn triggered_update_coalescing() {
    let mut node = node(9, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    node.recv(peer, 1, 255, &response(&[(net4!("10.2.0.0/16"), 1)]));
    assert!(node.agent.state.triggered_upd_timer.is_some());
    node.recv(peer, 1, 255, &response(&[(net4!("10.3.0.0/16"), 1)]));

    node.run_until(secs(6));

    let responses = node.sent_responses();
    assert_eq!(responses.len(), 1);
    let prefixes = responses[0]
        .2
        .rtes
        .iter()
        .map(|rte| rte.as_route().unwrap().prefix)
        .collect::<Vec<_>>();
    assert!(prefixes.contains(&net4!("10.2.0.0/16")));
    assert!(prefixes.contains(&net4!("10.3.0.0/16")));
    assert!(node.agent.state.triggered_upd_timer.is_none());
}

//
// When a neighbor goes silent its routes first become unreachable after the
// timeout interval and are flushed from the table after the garbage
// collection interval.
//
#[test]
fn route_aging_and_garbage_collection() {
    let mut sim = Sim::new();
    let a = sim.add_node(11);
    let b = sim.add_node(12);

    sim.add_iface(a, 1, net4!("10.0.1.1/24"));
    sim.add_iface(b, 1, net4!("10.0.1.2/24"));
    sim.add_iface(b, 2, net4!("10.0.9.1/24"));
    sim.link((a, 1), (b, 1));

    sim.start();
    sim.run_until(secs(50));

    let route = &sim.nodes[a].agent.state.routes[&net4!("10.0.9.0/24")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 2);

    // B goes silent.
    sim.unlink((a, 1));
    sim.run_until(secs(250));

    let route = &sim.nodes[a].agent.state.routes[&net4!("10.0.9.0/24")];
    assert_eq!(route.status, RouteStatus::Invalid);
    assert!(route.metric.is_infinite());
    check_invariants(&sim.nodes[a]);

    sim.run_until(secs(360));
    let routes = &sim.nodes[a].agent.state.routes;
    assert!(!routes.contains_key(&net4!("10.0.9.0/24")));

    // A's own connected route never ages out.
    let route = &routes[&net4!("10.0.1.0/24")];
    assert!(route.gateway.is_none());
    assert_eq!(route.metric.get(), 1);
}

//
// A fresh advertisement during the garbage window resurrects the prefix
// through the new gateway.
//
#[test]
fn resurrection_during_garbage_window() {
    let mut node = node(13, &[(1, net4!("10.0.0.1/24"))]);
    let gw1 = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);
    let gw2 = SocketAddrV4::new(ip4!("10.0.0.3"), UDP_PORT);

    node.recv(gw1, 1, 255, &response(&[(net4!("10.5.0.0/16"), 2)]));
    let route = &node.agent.state.routes[&net4!("10.5.0.0/16")];
    assert_eq!(route.metric.get(), 3);

    // The gateway withdraws the prefix.
    node.recv(gw1, 1, 255, &response(&[(net4!("10.5.0.0/16"), 16)]));
    let route = &node.agent.state.routes[&net4!("10.5.0.0/16")];
    assert_eq!(route.status, RouteStatus::Invalid);
    assert!(route.garbage_timer.is_some());
    check_invariants(&node);

    // Another router still has it.
    node.recv(gw2, 1, 255, &response(&[(net4!("10.5.0.0/16"), 1)]));
    let route = &node.agent.state.routes[&net4!("10.5.0.0/16")];
    assert_eq!(route.status, RouteStatus::Valid);
    assert_eq!(route.metric.get(), 2);
    assert_eq!(route.gateway, Some(ip4!("10.0.0.3")));
    assert!(route.garbage_timer.is_none());
    check_invariants(&node);
}

//
// Infinity for a prefix we never heard of carries no information.
//
#[test]
fn unknown_prefix_at_infinity_is_noop() {
    let mut node = node(14, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    node.recv(peer, 1, 255, &response(&[(net4!("10.6.0.0/16"), 16)]));
    assert!(!node
        .agent
        .state
        .routes
        .contains_key(&net4!("10.6.0.0/16")));
}

//
// Inbound filters: self-sourced packets, wrong hop counts, bad source
// ports and excluded interfaces all drop the message.
//
#[test]
fn inbound_message_filters() {
    let mut node = node(15, &[(1, net4!("10.0.0.1/24"))]);
    let prefix = net4!("10.7.0.0/16");

    // Our own multicast looped back.
    let own = SocketAddrV4::new(ip4!("10.0.0.1"), UDP_PORT);
    node.recv(own, 1, 255, &response(&[(prefix, 1)]));
    assert!(!node.agent.state.routes.contains_key(&prefix));
    assert!(node.agent.state.neighbors.is_empty());

    // A response that crossed a router.
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);
    node.recv(peer, 1, 254, &response(&[(prefix, 1)]));
    assert!(!node.agent.state.routes.contains_key(&prefix));

    // A response from an ephemeral source port.
    let odd_port = SocketAddrV4::new(ip4!("10.0.0.2"), 3000);
    node.recv(odd_port, 1, 255, &response(&[(prefix, 1)]));
    assert!(!node.agent.state.routes.contains_key(&prefix));

    // A whole-table request that crossed a router.
    node.agent.io.sent.clear();
    node.recv(peer, 1, 254, &Pdu::new_dump_request().encode());
    assert!(node.agent.io.sent.is_empty());

    // Anything on an excluded interface.
    node.agent.set_interface_excluded(1, true);
    node.recv(peer, 1, 255, &response(&[(prefix, 1)]));
    assert!(!node.agent.state.routes.contains_key(&prefix));
    node.recv(peer, 1, 255, &Pdu::new_dump_request().encode());
    assert!(node.agent.io.sent.is_empty());
}

//
// Once the update interval has passed, the pending triggered state is gone
// and every change flag has been cleared.
//
#[test]
fn update_interval_clears_pending_state() {
    let mut node = node(16, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    // Run just shy of the first periodic update, then change the RIB.
    node.run_until(secs(29));
    node.agent.io.sent.clear();
    node.recv(peer, 1, 255, &response(&[(net4!("10.8.0.0/16"), 1)]));
    assert!(node.agent.state.triggered_upd_timer.is_some());

    // The periodic fires somewhere in [30s, 45s] and preempts it.
    node.run_until(secs(46));
    assert!(node.agent.state.triggered_upd_timer.is_none());
    assert!(!node.sent_responses().is_empty());

    // No change flags remain.
    for route in node.agent.state.routes.values() {
        assert!(!route.flags.contains(RouteFlags::CHANGED));
    }
}

//
// Teardown cancels every timer and closes every socket before the table is
// destroyed, so nothing can fire against a deleted entry.
//
#[test]
fn shutdown_releases_resources() {
    let mut node = node(17, &[(1, net4!("10.0.0.1/24"))]);
    let peer = SocketAddrV4::new(ip4!("10.0.0.2"), UDP_PORT);

    node.recv(peer, 1, 255, &response(&[(net4!("10.2.0.0/16"), 1)]));
    assert!(!node.agent.state.routes.is_empty());
    assert!(!node.agent.io.sockets.is_empty());

    node.agent.shutdown(&mut node.sched);
    assert!(node.agent.state.routes.is_empty());
    assert!(node.agent.state.neighbors.is_empty());
    assert!(node.agent.io.sockets.is_empty());
    assert_eq!(node.sched.next_deadline(), None);
}
