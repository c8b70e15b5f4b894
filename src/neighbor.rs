//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{btree_map, BTreeMap};
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::debug::Debug;
use crate::tasks::{self, Scheduler, TimerHandle};

// Unlike most other routing protocols, the RIP protocol doesn't have a defined
// notion of neighbors. There are no hello packets or sessions to maintain.
// Nevertheless, it's beneficial to keep track of all sources of RIP packets,
// as this information can be valuable for network monitoring and
// troubleshooting.
#[derive(Debug)]
pub struct Neighbor {
    // Neighbor's source address.
    pub addr: Ipv4Addr,
    // Time when the most recent RIP update was received from this neighbor.
    pub last_update: DateTime<Utc>,
    // Number of invalid RIP packets received from this neighbor.
    pub bad_packets_rcvd: u32,
    // Neighbor's timeout (refreshed whenever a RIP update is received).
    pub timeout_timer: TimerHandle,
}

// ===== impl Neighbor =====

impl Neighbor {
    fn new(addr: Ipv4Addr, timeout: Duration, sched: &mut Scheduler) -> Neighbor {
        Debug::NbrCreate(&addr).log();

        Neighbor {
            addr,
            last_update: Utc::now(),
            bad_packets_rcvd: 0,
            timeout_timer: tasks::nbr_timeout(sched, addr, timeout),
        }
    }

    fn timeout_reset(&mut self, timeout: Duration, sched: &mut Scheduler) {
        sched.cancel(self.timeout_timer);
        self.timeout_timer = tasks::nbr_timeout(sched, self.addr, timeout);
    }

    pub(crate) fn stop_timers(&mut self, sched: &mut Scheduler) {
        sched.cancel(self.timeout_timer);
    }
}

// ===== global functions =====

pub(crate) fn update<'a>(
    neighbors: &'a mut BTreeMap<Ipv4Addr, Neighbor>,
    addr: Ipv4Addr,
    timeout: Duration,
    sched: &mut Scheduler,
) -> &'a mut Neighbor {
    match neighbors.entry(addr) {
        btree_map::Entry::Occupied(o) => {
            let nbr = o.into_mut();
            nbr.last_update = Utc::now();
            nbr.timeout_reset(timeout, sched);
            nbr
        }
        btree_map::Entry::Vacant(v) => {
            let nbr = Neighbor::new(addr, timeout, sched);
            v.insert(nbr)
        }
    }
}
