//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::Ipv4Network;

use self::messages::input::*;

//
// RIP event diagram:
//
//                                  +--------------+
//             packet rx (Nx)    -> |              |
//       initial_request (0/1x)  -> |              |
//        update_interval (1x)   -> |              |
//      triggered_update (0/1x)  -> |   instance   | -> (Nx) packet tx
//           nbr_timeout (Nx)    -> |              |
//         route_timeout (Nx)    -> |              |
//      route_gc_timeout (Nx)    -> |              |
//                                  +--------------+
//
// All timer-driven inputs are scheduler messages; packet rx/tx go through
// the UdpIo seam.
//

// RIP timer message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolMsg = input::ProtocolMsg;

    // Input messages (scheduler -> instance).
    pub mod input {
        use std::net::Ipv4Addr;

        use ipnetwork::Ipv4Network;

        use super::*;

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub enum ProtocolMsg {
            InitialRequest(InitialRequestMsg),
            UpdateInterval(UpdateIntervalMsg),
            TriggeredUpdate(TriggeredUpdateMsg),
            NbrTimeout(NbrTimeoutMsg),
            RouteTimeout(RouteTimeoutMsg),
            RouteGcTimeout(RouteGcTimeoutMsg),
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct InitialRequestMsg {}

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct UpdateIntervalMsg {}

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct TriggeredUpdateMsg {}

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct NbrTimeoutMsg {
            pub addr: Ipv4Addr,
        }

        // Timer messages capture the route's key rather than any reference
        // to the entry, so replacing the entry object cannot leak a stale
        // callback.
        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct RouteTimeoutMsg {
            pub prefix: Ipv4Network,
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct RouteGcTimeoutMsg {
            pub prefix: Ipv4Network,
        }
    }
}

// Handle referencing a pending timer. Cancellation through a stale handle
// (already fired or already cancelled) is a no-op.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerHandle(u64);

// Single-threaded timer wheel. The embedding event loop owns one scheduler
// per instance and pumps due messages back into it. Timers armed for the
// same instant fire in arming order.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: Duration,
    // Timer ids are monotonic, which doubles as the same-instant tiebreak.
    queue: BinaryHeap<Reverse<(Duration, u64)>>,
    pending: HashMap<u64, Pending>,
    next_id: u64,
}

#[derive(Debug)]
struct Pending {
    fire_at: Duration,
    msg: ProtocolMsg,
}

// ===== impl Scheduler =====

impl Scheduler {
    pub fn new() -> Scheduler {
        Default::default()
    }

    // Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    // Arm a one-shot timer.
    pub fn timeout(&mut self, delay: Duration, msg: ProtocolMsg) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;

        let fire_at = self.now + delay;
        self.queue.push(Reverse((fire_at, id)));
        self.pending.insert(id, Pending { fire_at, msg });

        TimerHandle(id)
    }

    // Disarm a timer. Idempotent.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle.0);
    }

    // Time left until the timer fires, or None if it already fired or was
    // cancelled.
    pub fn remaining(&self, handle: TimerHandle) -> Option<Duration> {
        self.pending
            .get(&handle.0)
            .map(|pending| pending.fire_at.saturating_sub(self.now))
    }

    // Instant of the earliest pending timer.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((fire_at, id))) = self.queue.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(fire_at);
            }
            // Cancelled entry, discard lazily.
            self.queue.pop();
        }
        None
    }

    // Advance virtual time to the next due timer, if it fires no later than
    // the given horizon, and return its message.
    pub fn poll(&mut self, horizon: Duration) -> Option<ProtocolMsg> {
        let fire_at = self.next_deadline()?;
        if fire_at > horizon {
            return None;
        }

        let Reverse((_, id)) = self.queue.pop().unwrap();
        let pending = self.pending.remove(&id).unwrap();
        self.now = pending.fire_at;
        Some(pending.msg)
    }
}

// ===== RIP timers =====

// Initial whole-table request.
pub(crate) fn initial_request(
    sched: &mut Scheduler,
    delay: Duration,
) -> TimerHandle {
    sched.timeout(delay, ProtocolMsg::InitialRequest(InitialRequestMsg {}))
}

// Unsolicited route update interval. One-shot: the expiry handler
// reschedules it with fresh jitter.
pub(crate) fn update_interval(
    sched: &mut Scheduler,
    interval: Duration,
) -> TimerHandle {
    sched.timeout(interval, ProtocolMsg::UpdateInterval(UpdateIntervalMsg {}))
}

// Triggered update cooldown.
pub(crate) fn triggered_update(
    sched: &mut Scheduler,
    delay: Duration,
) -> TimerHandle {
    sched.timeout(delay, ProtocolMsg::TriggeredUpdate(TriggeredUpdateMsg {}))
}

// Neighbor timeout.
pub(crate) fn nbr_timeout(
    sched: &mut Scheduler,
    addr: Ipv4Addr,
    timeout: Duration,
) -> TimerHandle {
    sched.timeout(timeout, ProtocolMsg::NbrTimeout(NbrTimeoutMsg { addr }))
}

// Route timeout.
pub(crate) fn route_timeout(
    sched: &mut Scheduler,
    prefix: Ipv4Network,
    timeout: Duration,
) -> TimerHandle {
    sched.timeout(timeout, ProtocolMsg::RouteTimeout(RouteTimeoutMsg { prefix }))
}

// Route garbage-collection timeout.
pub(crate) fn route_gc_timeout(
    sched: &mut Scheduler,
    prefix: Ipv4Network,
    timeout: Duration,
) -> TimerHandle {
    sched.timeout(
        timeout,
        ProtocolMsg::RouteGcTimeout(RouteGcTimeoutMsg { prefix }),
    )
}
