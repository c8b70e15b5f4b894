//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use ipnetwork::Ipv4Network;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::route::Metric;

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Command {
    Request = 1,
    Response = 2,
}

//
// The RIP packet format is:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  command (1)  |  version (1)  |       must be zero (2)        |
// +---------------+---------------+-------------------------------+
// |                                                               |
// ~                         RIP Entry (20)                        ~
// |                                                               |
// +---------------+---------------+---------------+---------------+
//
#[derive(Clone, Debug, Deserialize, Eq, new, PartialEq, Serialize)]
pub struct Pdu {
    pub command: Command,
    #[new(value = "2")]
    pub version: u8,
    pub rtes: Vec<Rte>,
}

//
// The format for the 20-octet route entry (RTE) for RIP-2 is:
//
//  0                   1                   2                   3 3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Address Family Identifier (2) |        Route Tag (2)          |
// +-------------------------------+-------------------------------+
// |                         IP Address (4)                        |
// +---------------------------------------------------------------+
// |                         Subnet Mask (4)                       |
// +---------------------------------------------------------------+
// |                         Next Hop (4)                          |
// +---------------------------------------------------------------+
// |                         Metric (4)                            |
// +---------------------------------------------------------------+
//
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Rte {
    Zero(RteZero),
    Ipv4(RteIpv4),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RteZero {
    pub metric: Metric,
}

#[derive(Clone, Debug, Deserialize, Eq, new, PartialEq, Serialize)]
pub struct RteIpv4 {
    pub tag: u16,
    pub prefix: Ipv4Network,
    pub nexthop: Option<Ipv4Addr>,
    pub metric: Metric,
}

// RIP decode errors.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    InvalidLength(usize),
    InvalidCommand(u8),
    InvalidVersion(u8),
    InvalidZeroField(u16),
    InvalidRteAddressFamily(u16),
    InvalidRtePrefix(Ipv4Addr, Ipv4Addr),
    InvalidRteNexthop(Ipv4Addr),
    InvalidRteMetric(u32),
}

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// ===== impl Pdu =====

impl Pdu {
    pub const VERSION: u8 = 2;
    pub const HDR_LENGTH: usize = 4;
    pub const MAX_ENTRIES: usize = 25;
    pub const MAX_SIZE: usize =
        Self::HDR_LENGTH + Self::MAX_ENTRIES * Rte::LENGTH;

    // Encode PDU into a bytes buffer.
    pub fn encode(&self) -> BytesMut {
        // Pre-allocate buffer to hold the entire PDU.
        let size = Self::HDR_LENGTH + self.rtes.len() * Rte::LENGTH;
        let mut buf = BytesMut::with_capacity(size);

        // Encode PDU header.
        buf.put_u8(self.command as u8);
        buf.put_u8(self.version);
        buf.put_u16(0);

        // Encode RTEs.
        for rte in &self.rtes {
            rte.encode(&mut buf);
        }

        buf
    }

    // Decode PDU from a bytes buffer.
    //
    // A single invalid RTE rejects the whole message.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Validate the packet length. The payload past the header must hold
        // an integral number of RTEs.
        let buf_size = data.len();
        if !(Self::HDR_LENGTH..=Self::MAX_SIZE).contains(&buf_size)
            || (buf_size - Self::HDR_LENGTH) % Rte::LENGTH != 0
        {
            return Err(DecodeError::InvalidLength(buf_size));
        }

        // Parse and validate RIP command.
        let command = buf.get_u8();
        let command = Command::from_u8(command)
            .ok_or(DecodeError::InvalidCommand(command))?;

        // Parse and validate RIP version.
        let version = buf.get_u8();
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        // Parse and validate MBZ field.
        let mbz = buf.get_u16();
        if mbz != 0 {
            return Err(DecodeError::InvalidZeroField(mbz));
        }

        // Decode RIP RTEs.
        let mut rtes = vec![];
        while buf.remaining() >= Rte::LENGTH {
            rtes.push(Rte::decode(&mut buf)?);
        }

        Ok(Pdu {
            command,
            version,
            rtes,
        })
    }

    // Create a request to send the entire routing table.
    pub fn new_dump_request() -> Self {
        let rtes = vec![Rte::Zero(RteZero {
            metric: Metric::from(Metric::INFINITE),
        })];
        Pdu::new(Command::Request, rtes)
    }

    // If there is exactly one entry in the request, and it has an address
    // family identifier of zero and a metric of infinity (i.e., 16), then this
    // is a request to send the entire routing table.
    pub fn is_dump_request(&self) -> bool {
        self.command == Command::Request
            && self.rtes.len() == 1
            && self.rtes[0]
                == Rte::Zero(RteZero {
                    metric: Metric::from(Metric::INFINITE),
                })
    }
}

// ===== impl Rte =====

impl Rte {
    pub const LENGTH: usize = 20;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Rte::Zero(rte) => rte.encode(buf),
            Rte::Ipv4(rte) => rte.encode(buf),
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let rte = match afi as i32 {
            libc::AF_UNSPEC => Rte::Zero(RteZero::decode(buf)?),
            libc::AF_INET => Rte::Ipv4(RteIpv4::decode(buf)?),
            _ => {
                buf.advance(Rte::LENGTH - 2);
                return Err(DecodeError::InvalidRteAddressFamily(afi));
            }
        };

        Ok(rte)
    }

    // Return a reference to the inner route RTE.
    pub fn as_route(&self) -> Option<&RteIpv4> {
        if let Rte::Ipv4(rte) = self {
            Some(rte)
        } else {
            None
        }
    }

    // Return a mutable reference to the inner route RTE.
    pub fn as_route_mut(&mut self) -> Option<&mut RteIpv4> {
        if let Rte::Ipv4(rte) = self {
            Some(rte)
        } else {
            None
        }
    }
}

// ===== impl RteZero =====

impl RteZero {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(libc::AF_UNSPEC as u16);
        buf.put_u16(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(self.metric.get().into());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _tag = buf.get_u16();
        let _prefix_addr = buf.get_u32();
        let _prefix_mask = buf.get_u32();
        let _nexthop = buf.get_u32();
        let metric = buf.get_u32();

        // Sanity checks.
        let metric = Metric::new(metric)
            .map_err(|_| DecodeError::InvalidRteMetric(metric))?;

        Ok(RteZero { metric })
    }
}

// ===== impl RteIpv4 =====

impl RteIpv4 {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(libc::AF_INET as u16);
        buf.put_u16(self.tag);
        buf.put_u32(self.prefix.ip().into());
        buf.put_u32(self.prefix.mask().into());
        if let Some(nexthop) = &self.nexthop {
            buf.put_u32((*nexthop).into());
        } else {
            buf.put_u32(0);
        }
        buf.put_u32(self.metric.get().into());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let tag = buf.get_u16();
        let addr = Ipv4Addr::from(buf.get_u32());
        let mask = Ipv4Addr::from(buf.get_u32());
        let nexthop = Ipv4Addr::from(buf.get_u32());
        let metric = buf.get_u32();

        // Validate addr/mask.
        if addr.is_loopback() || addr.is_broadcast() || addr.is_multicast() {
            return Err(DecodeError::InvalidRtePrefix(addr, mask));
        }
        let prefix = Ipv4Network::with_netmask(addr, mask)
            .map_err(|_| DecodeError::InvalidRtePrefix(addr, mask))?;

        // Validate nexthop.
        let nexthop = if nexthop.is_unspecified() {
            None
        } else {
            if nexthop.is_loopback() || nexthop.is_multicast() {
                return Err(DecodeError::InvalidRteNexthop(nexthop));
            }
            Some(nexthop)
        };

        // Validate metric.
        let metric = Metric::new(metric)
            .map_err(|_| DecodeError::InvalidRteMetric(metric))?;

        Ok(RteIpv4 {
            tag,
            prefix,
            nexthop,
            metric,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidLength(length) => {
                write!(f, "Invalid Length: {}", length)
            }
            DecodeError::InvalidCommand(command) => {
                write!(f, "Invalid RIP command: {}", command)
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "Invalid RIP version: {}", version)
            }
            DecodeError::InvalidZeroField(value) => {
                write!(f, "Invalid must-be-zero field: {}", value)
            }
            DecodeError::InvalidRteAddressFamily(afi) => {
                write!(f, "Invalid RIP address-family: {}", afi)
            }
            DecodeError::InvalidRtePrefix(addr, mask) => {
                write!(f, "Invalid RTE prefix: {} mask {}", addr, mask)
            }
            DecodeError::InvalidRteNexthop(nexthop) => {
                write!(f, "Invalid RTE nexthop: {}", nexthop)
            }
            DecodeError::InvalidRteMetric(metric) => {
                write!(f, "Invalid RIP metric: {}", metric)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
