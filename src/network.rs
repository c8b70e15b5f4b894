//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::IoError;
use crate::packet::Pdu;

// RIP destination UDP port.
pub const UDP_PORT: u16 = 520;

// All RIPv2 routers multicast group.
pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

// RIP packets are sent with TTL 255 so receivers can verify the sender is
// on-link (any forwarding would have decremented it).
pub const TTL: u8 = 255;

// Opaque reference to a UDP socket owned by the I/O layer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SocketHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SendDestination {
    Multicast,
    Unicast(SocketAddrV4),
}

// Seam to the UDP layer. The surrounding I/O runtime (or the test harness)
// implements this; the agent only ever sees fully encoded datagrams and
// opaque socket handles.
pub trait UdpIo {
    // Open a socket bound to the given interface's address, source port 520.
    fn open_send_socket(
        &mut self,
        ifindex: u32,
        addr: Ipv4Addr,
    ) -> Result<SocketHandle, std::io::Error>;

    // Open the socket bound to 0.0.0.0:520.
    fn open_recv_socket(&mut self) -> Result<SocketHandle, std::io::Error>;

    // Close a previously opened socket. Closing twice is a no-op.
    fn close_socket(&mut self, socket: SocketHandle);

    // Transmit one datagram.
    fn send(
        &mut self,
        socket: SocketHandle,
        dst: SocketAddrV4,
        ttl: u8,
        data: Bytes,
    ) -> Result<(), std::io::Error>;
}

// ===== global functions =====

pub(crate) fn send_packet<I>(
    io: &mut I,
    socket: SocketHandle,
    dst: SendDestination,
    pdu: &Pdu,
) -> Result<(), IoError>
where
    I: UdpIo,
{
    // Encode PDU.
    let buf = pdu.encode();

    let sockaddr = match dst {
        SendDestination::Multicast => {
            SocketAddrV4::new(MULTICAST_ADDR, UDP_PORT)
        }
        SendDestination::Unicast(sockaddr) => sockaddr,
    };

    // Send packet.
    io.send(socket, sockaddr, TTL, buf.freeze())
        .map_err(IoError::UdpSendError)
}
