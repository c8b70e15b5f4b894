//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{debug, error, warn};

use crate::packet::DecodeError;

// RIP errors.
#[derive(Debug)]
pub enum Error {
    IoError(IoError),
    UdpPduDecodeError(Ipv4Addr, DecodeError),
    UdpWrongHopCount(Ipv4Addr, u8),
    UdpSelfSourced(Ipv4Addr),
    UdpExcludedInterface(Ipv4Addr, u32),
    InterfaceStartError(u32, IoError),
}

// RIP I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpSendError(std::io::Error),
}

// RIP metric errors.
#[derive(Debug)]
pub enum MetricError {
    InvalidValue,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::UdpPduDecodeError(source, error) => {
                warn!(%source, %error, "{}", self);
            }
            Error::UdpWrongHopCount(source, ttl) => {
                warn!(%source, %ttl, "{}", self);
            }
            Error::UdpSelfSourced(source) => {
                // Expected on multicast segments, not worth a warning.
                debug!(%source, "{}", self);
            }
            Error::UdpExcludedInterface(source, ifindex) => {
                debug!(%source, %ifindex, "{}", self);
            }
            Error::InterfaceStartError(ifindex, error) => {
                error!(%ifindex, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::UdpPduDecodeError(..) => {
                write!(f, "failed to decode PDU")
            }
            Error::UdpWrongHopCount(..) => {
                write!(f, "packet with suspicious hop count")
            }
            Error::UdpSelfSourced(..) => {
                write!(f, "packet sent by myself")
            }
            Error::UdpExcludedInterface(..) => {
                write!(f, "packet received on excluded interface")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::UdpPduDecodeError(_, error) => Some(error),
            Error::InterfaceStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::UdpSocketError(error) | IoError::UdpSendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::UdpSendError(..) => {
                write!(f, "failed to send UDP packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error) | IoError::UdpSendError(error) => {
                Some(error)
            }
        }
    }
}

// ===== impl MetricError =====

impl std::fmt::Display for MetricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricError::InvalidValue => {
                write!(f, "invalid RIP metric")
            }
        }
    }
}

impl std::error::Error for MetricError {}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
