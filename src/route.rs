//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::MetricError;
use crate::tasks::{self, Scheduler, TimerHandle};

#[derive(Debug)]
pub struct Route {
    pub prefix: Ipv4Network,
    pub ifindex: u32,
    // Advertising router, or None for directly connected and locally
    // injected routes (encoded as 0.0.0.0 on the wire).
    pub gateway: Option<Ipv4Addr>,
    pub metric: Metric,
    pub tag: u16,
    pub route_type: RouteType,
    pub status: RouteStatus,
    pub flags: RouteFlags,
    pub timeout_timer: Option<TimerHandle>,
    pub garbage_timer: Option<TimerHandle>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Metric(u8);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteType {
    Connected,
    Static,
    Rip,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteStatus {
    Valid,
    Invalid,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const CHANGED = 0x01;
    }
}

// ===== impl Route =====

impl Route {
    pub(crate) fn new(
        prefix: Ipv4Network,
        ifindex: u32,
        gateway: Option<Ipv4Addr>,
        metric: Metric,
        tag: u16,
        route_type: RouteType,
    ) -> Self {
        Debug::RouteCreate(&prefix, &gateway, &metric).log();

        Route {
            prefix,
            ifindex,
            gateway,
            metric,
            tag,
            route_type,
            status: RouteStatus::Valid,
            flags: RouteFlags::CHANGED,
            timeout_timer: None,
            garbage_timer: None,
        }
    }

    // Tombstone the route and schedule its deletion.
    pub(crate) fn invalidate(
        &mut self,
        flush_interval: Duration,
        sched: &mut Scheduler,
    ) {
        Debug::RouteInvalidate(&self.prefix).log();

        self.metric.set_infinite();
        self.status = RouteStatus::Invalid;
        self.flags.insert(RouteFlags::CHANGED);
        self.timeout_stop(sched);
        self.garbage_collection_start(flush_interval, sched);
    }

    pub(crate) fn timeout_reset(
        &mut self,
        invalid_interval: Duration,
        sched: &mut Scheduler,
    ) {
        if let Some(timer) = self.timeout_timer.take() {
            sched.cancel(timer);
        }
        self.timeout_timer =
            Some(tasks::route_timeout(sched, self.prefix, invalid_interval));
    }

    pub(crate) fn timeout_stop(&mut self, sched: &mut Scheduler) {
        if let Some(timer) = self.timeout_timer.take() {
            sched.cancel(timer);
        }
    }

    pub(crate) fn timeout_remaining(
        &self,
        sched: &Scheduler,
    ) -> Option<Duration> {
        self.timeout_timer
            .as_ref()
            .and_then(|timer| sched.remaining(*timer))
    }

    pub(crate) fn garbage_collection_start(
        &mut self,
        flush_interval: Duration,
        sched: &mut Scheduler,
    ) {
        if let Some(timer) = self.garbage_timer.take() {
            sched.cancel(timer);
        }
        self.garbage_timer =
            Some(tasks::route_gc_timeout(sched, self.prefix, flush_interval));
    }

    pub(crate) fn garbage_collection_stop(&mut self, sched: &mut Scheduler) {
        if let Some(timer) = self.garbage_timer.take() {
            sched.cancel(timer);
        }
    }

    // Cancel all timers referencing this route. Must be called before the
    // route is dropped, otherwise a stale callback could resurface its key.
    pub(crate) fn stop_timers(&mut self, sched: &mut Scheduler) {
        self.timeout_stop(sched);
        self.garbage_collection_stop(sched);
    }
}

// ===== impl Metric =====

impl Metric {
    pub const INFINITE: u8 = 16;

    pub(crate) fn new(metric: impl TryInto<u8>) -> Result<Self, MetricError> {
        match metric.try_into() {
            Ok(metric) => {
                // Validate metric.
                if metric == 0 || metric > Self::INFINITE {
                    return Err(MetricError::InvalidValue);
                }

                Ok(Metric(metric))
            }
            Err(_) => Err(MetricError::InvalidValue),
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    // Add the cost of the network the advertisement arrived on, saturating
    // at infinity.
    pub(crate) fn add(&mut self, cost: u8) {
        self.0 = std::cmp::min(self.0.saturating_add(cost), Self::INFINITE);
    }

    pub(crate) fn set_infinite(&mut self) {
        self.0 = Self::INFINITE
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == Self::INFINITE
    }
}

impl From<u8> for Metric {
    // This function panics on error. It should only be used when the metric
    // has already been previously validated.
    fn from(metric: u8) -> Metric {
        Metric::new(metric).expect("Invalid metric value")
    }
}
