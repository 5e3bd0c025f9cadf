//! The nameserver pool: per-server health, round-robin selection with a
//! health skip, and the probe back-off schedule.

use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use log::error;
use runtime::Io;
use slab::Slab;
use stakker::{FixedTimerKey, Fwd};
use utils::error::*;

/// Probe retry back-off, indexed by `min(failed_times - 1, len - 1)`.
pub(crate) const PROBE_BACKOFF: [Duration; 5] = [
	Duration::from_secs(10),
	Duration::from_secs(60),
	Duration::from_secs(300),
	Duration::from_secs(900),
	Duration::from_secs(3600),
];

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Health {
	Up,
	Down,
}

pub(crate) struct Nameserver {
	pub address: SocketAddr,
	pub io: Io,
	pub state: Health,
	/// Consecutive failed probes; meaningful while DOWN.
	pub failed_times: usize,
	/// Consecutive request timeouts; meaningful while UP.
	pub timedout: usize,
	/// The kernel send buffer filled up; sends wait for write-readiness.
	pub choked: bool,
	/// Armed exactly while the server is DOWN.
	pub probe_timer: FixedTimerKey,
}

impl Nameserver {
	/// Binds an ephemeral socket and connects it to the server, so that
	/// replies can only arrive from the address that was queried.
	pub fn connect(address: SocketAddr, read: Fwd<(SocketAddr, Box<[u8]>)>, writable: Fwd<()>) -> Option<Self> {
		let socket = bind_connected(address).ok_or(|err| error!("Failed to create a socket for {address}: {err}"))?;
		let io = Io::register(socket, read, writable).ok()?;

		Some(Self {
			address,
			io,
			state: Health::Up,
			failed_times: 0,
			timedout: 0,
			choked: false,
			probe_timer: FixedTimerKey::default(),
		})
	}
}

fn bind_connected(addr: SocketAddr) -> std::io::Result<UdpSocket> {
	let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

	socket.set_nonblocking(true)?;
	socket.connect(addr)?;

	Ok(socket)
}

#[derive(Default)]
pub(crate) struct Pool {
	pub servers: Slab<Nameserver>,
	/// Rotation order (insertion order); the cursor is the round-robin
	/// position and selection advances it.
	order: Vec<usize>,
	cursor: usize,
	/// How many servers are UP.
	pub good: usize,
}

impl Pool {
	pub fn len(&self) -> usize {
		self.servers.len()
	}

	pub fn find(&self, address: SocketAddr) -> Option<usize> {
		self.servers.iter().find(|(_, ns)| ns.address == address).map(|(slot, _)| slot)
	}

	pub fn insert(&mut self, ns: Nameserver) -> usize {
		let slot = self.servers.insert(ns);
		self.order.push(slot);
		self.good += 1;
		slot
	}

	/// Round-robin selection with a health skip. With no UP server in the
	/// pool, the current cursor position is returned anyway — the caller
	/// will most likely fail, but there is still something to attempt.
	pub fn pick(&mut self) -> Option<usize> {
		if self.order.is_empty() {
			return None;
		}

		if self.good == 0 {
			return Some(self.advance());
		}

		loop {
			let slot = self.advance();

			if self.servers[slot].state == Health::Up {
				return Some(slot);
			}
		}
	}

	fn advance(&mut self) -> usize {
		let slot = self.order[self.cursor];
		self.cursor = (self.cursor + 1) % self.order.len();
		slot
	}

	/// Drops every server. Sockets deregister as they drop; the probe
	/// timers must have been cancelled by the caller.
	pub fn clear(&mut self) {
		self.servers.clear();
		self.order.clear();
		self.cursor = 0;
		self.good = 0;
	}
}
