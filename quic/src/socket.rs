//! Non-blocking UDP transport (spec §4.7, §6).
//!
//! A socket that `connect()`s to exactly one peer address doesn't fit here: a gQUIC server
//! and a client that has `spawn`ed additional sessions both demultiplex inbound datagrams
//! from *many* peer addresses off of one *unconnected* socket by 8-byte connection id
//! (spec §9). This wraps a plain non-blocking `std::net::UdpSocket` with
//! `recv_from`/`send_to` rather than a pre-connected, single-peer abstraction.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::config::MAX_RECEIVE_PACKET_SIZE;

pub struct UdpTransport {
	socket: UdpSocket,
}

impl UdpTransport {
	pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
		let socket = UdpSocket::bind(addr)?;
		socket.set_nonblocking(true)?;
		Ok(Self { socket })
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.socket.local_addr()
	}

	/// Best-effort send: a `WouldBlock` on an unconnected UDP socket means the local send
	/// buffer is full, not that the datagram was refused. gQUIC already tolerates lost
	/// datagrams via its own ACK/retransmission bookkeeping (spec §4.6), so this drops the
	/// datagram on the floor exactly like a lossy network link would.
	pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<()> {
		match self.socket.send_to(buf, addr) {
			Ok(_) => Ok(()),
			Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
			Err(err) => Err(err),
		}
	}

	/// Drains one ready datagram, or `None` if nothing is waiting. Datagrams larger than
	/// `MAX_RECEIVE_PACKET_SIZE` are truncated by the kernel filling only as much of the
	/// buffer as fits (spec §6: "Inbound truncation... drop datagrams of zero length").
	pub fn try_recv(&self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
		let mut buf = [0u8; MAX_RECEIVE_PACKET_SIZE];
		match self.socket.recv_from(&mut buf) {
			Ok((0, _)) => Ok(None),
			Ok((n, from)) => Ok(Some((buf[..n].to_vec(), from))),
			Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
			Err(err) => Err(err),
		}
	}
}
