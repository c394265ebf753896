//! Local-segment discovery over IPv4 multicast.
//!
//! Each node periodically sends a fixed-size `Announcement` to the group
//! and listens for everyone else's. Announcements for another rendezvous
//! tag are dropped at the listener.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

pub mod announce;
pub mod listener;

pub use listener::MulticastDiscovery;

/// Multicast group and port shared by announcer and listener.
#[derive(Debug, Clone, Copy)]
pub struct MulticastGroup {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl MulticastGroup {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn dest(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

/// UDP socket for sending to the group. TTL 1 keeps it on the segment.
fn make_sender_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    Ok(socket.into())
}

/// UDP socket bound to the group port and joined to the group.
fn make_listener_socket(group: MulticastGroup) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v4(&group.addr, &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket.into())
}
