use core::cell::RefCell;
use core::time::Duration;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use log::{debug, error, warn};
use stakker::Fwd;
use utils::error::*;

pub mod logger;
mod rt;

pub use rt::*;

/// Largest datagram either side of the resolver will carry (no EDNS, no
/// TCP fallback).
pub const MAX_DATAGRAM: usize = 1500;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

use sys::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new()
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of(&mut self, socket: &UdpSocket) -> usize {
		let raw = as_raw(socket);
		self.fds.iter().position(|f| f.fd == raw).expect("Socket is present")
	}

	/// Returns whether any sockets remain registered.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	/// Polls the registered sockets once. Returns whether any were ready.
	fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
		if self.fds.is_empty() {
			// Nothing registered; honor the timeout so timer-only phases
			// still sleep instead of spinning.
			if let Some(t) = timeout.filter(|t| !t.is_zero()) {
				std::thread::sleep(t);
			}

			return Ok(false);
		}

		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("Fewer than u32::MAX sockets"),
				as_timeout(timeout),
			)
		};

		let mut pending: u32 = ret.try_into().map_err(|_| error!("poll() failed: {}", std::io::Error::last_os_error()))?;

		if pending == 0 {
			return Ok(false);
		}

		for idx in 0..self.fds.len() {
			let Poll { events, revents, .. } = &mut self.fds[idx];
			let entry = &mut self.entries[idx];

			if *revents == 0 {
				continue;
			}

			if *revents & POLLOUT != 0 {
				// Write interest is one-shot; the next short send re-arms it.
				*events &= !POLLOUT;
				entry.writable.fwd(());
			}

			if *revents & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0 {
				// An error condition is consumed by the recv that reports it.
				entry.flush_read();
			}

			*revents = 0;

			pending -= 1;

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

struct Entry {
	socket: UdpSocket,
	read: Fwd<(SocketAddr, Box<[u8]>)>,
	writable: Fwd<()>,
}

impl Entry {
	fn flush_read(&mut self) {
		let mut buf = [0u8; MAX_DATAGRAM];

		loop {
			match self.socket.recv_from(&mut buf) {
				Ok((n, src)) => self.read.fwd((src, buf[..n].into())),
				Err(err) if err.kind() == ErrorKind::WouldBlock => break,
				Err(err) => {
					// Connected UDP sockets surface ICMP failures here.
					debug!("recv failed: {err}");
					break;
				}
			}
		}
	}
}

/// A nonblocking UDP socket registered with the reactor.
///
/// Incoming datagrams are drained on read-readiness and handed to `read`.
/// Sends are attempted immediately; when the kernel buffer is full the
/// socket arms write interest and `writable` fires once there is room. The
/// caller owns retransmission — nothing is queued here.
pub struct Io {
	inner: UdpSocket,
}

impl Io {
	pub fn register(inner: UdpSocket, read: Fwd<(SocketAddr, Box<[u8]>)>, writable: Fwd<()>) -> Result<Self> {
		let socket = inner.try_clone().map_err(|err| error!("Failed to clone socket for the poll set: {err}"))?;

		State::with(|i| {
			i.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });
			i.entries.push(Entry { socket, read, writable });
		});

		Ok(Self { inner })
	}

	/// Sends one datagram on a connected socket. `Ok(false)` means the send
	/// buffer was full; `writable` fires when there is room again.
	pub fn send(&self, buf: &[u8]) -> Result<bool> {
		self.complete(buf, self.inner.send(buf))
	}

	/// As `send`, for an unconnected socket.
	pub fn send_to(&self, buf: &[u8], dst: SocketAddr) -> Result<bool> {
		self.complete(buf, self.inner.send_to(buf, dst))
	}

	fn complete(&self, buf: &[u8], sent: std::io::Result<usize>) -> Result<bool> {
		match sent {
			Ok(n) if n == buf.len() => Ok(true),
			Ok(n) => {
				// A short datagram write is backpressure, not a failure.
				error!("Only sent {}/{} bytes of a datagram", n, buf.len());
				self.wait_writable();
				Ok(false)
			}
			Err(err) if err.kind() == ErrorKind::WouldBlock => {
				self.wait_writable();
				Ok(false)
			}
			Err(err) => {
				warn!("Socket send failed: {err}");
				Err(())
			}
		}
	}

	fn wait_writable(&self) {
		State::with(|i| {
			let idx = i.idx_of(&self.inner);
			i.fds[idx].events |= POLLOUT;
		});
	}
}

impl Drop for Io {
	fn drop(&mut self) {
		State::with(|i| {
			let idx = i.idx_of(&self.inner);
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}

/// Polls readiness once without entering the run loop. Embedders (and the
/// tests) that drive the `Stakker` queue themselves call this between runs.
pub fn poll_once(timeout: Option<Duration>) -> Result<bool> {
	State::with(|s| s.poll(timeout))
}
