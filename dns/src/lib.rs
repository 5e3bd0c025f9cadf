//! An asynchronous DNS stub resolver and lightweight authoritative
//! responder.
//!
//! The [`Resolver`] actor drives A and PTR lookups against a pool of
//! recursive nameservers over UDP: requests queue while the inflight window
//! is full, time out and retransmit, move to another server after
//! server-attributable failures, and short names expand through the
//! configured search list. A [`ServerPort`] actor accepts queries on a
//! bound socket and ships compressed responses, sharing the same wire
//! codec.
//!
//! Everything runs on the reactor thread; callbacks are `stakker` [`Ret`]
//! values and fire exactly once per top-level call.

pub mod config;
mod pool;
mod request;
mod search;
pub mod server;
mod wire;

pub use server::{Section, ServerPort, ServerRequest};
pub use wire::{Question, Type};

use core::time::Duration;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::warn;
use slab::Slab;
use stakker::{Ret, CX};

use crate::config::ParseError;
use crate::pool::Pool;
use crate::request::Request;
use crate::search::{SearchCtx, SearchState};

/// DNS over UDP.
pub const DNS_PORT: u16 = 53;

/// Flag for the resolve calls: never expand through the search list.
pub const QUERY_NO_SEARCH: u32 = 1;

/// The reserved transaction id meaning "not assigned". A request carries
/// it exactly while it sits in the waiting queue.
pub(crate) const TRANS_ID_NONE: u16 = 0xffff;

/// A decoded answer. The address buffer behind an `A` reply belongs to the
/// callback invocation; clone what must outlive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
	/// Up to four IPv4 addresses and the minimum TTL across the records
	/// they came from.
	A { addresses: Vec<Ipv4Addr>, ttl: u32 },
	/// The first PTR hostname of the answer section.
	Ptr { hostname: String, ttl: u32 },
}

/// Resolution failures as delivered to the user callback. The numeric
/// values are a published contract; success (0) is the `Ok` arm of
/// [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Error {
	/// The server could not interpret our query.
	Format = 1,
	/// The server had an internal failure.
	ServerFailed = 2,
	/// The name does not exist.
	NotExist = 3,
	/// The server does not implement the query kind.
	NotImplemented = 4,
	/// The server refused to answer for policy reasons.
	Refused = 5,
	/// The response was truncated, and UDP is the only transport.
	Truncated = 65,
	/// The reply was undecodable or carried no usable records.
	Unknown = 66,
	/// The retry budget was exhausted without a reply.
	Timeout = 67,
	/// The resolver was shut down with `fail_requests` set.
	Shutdown = 68,
}

impl Error {
	/// The contract value of this error.
	pub fn code(self) -> u8 {
		self as u8
	}
}

/// What a resolve call eventually hands to its callback.
pub type Answer = Result<Reply, Error>;

/// Tunables, defaulted per the classic resolver and adjustable through
/// `options` directives.
pub(crate) struct Options {
	pub max_inflight: usize,
	pub timeout: Duration,
	pub max_reissues: u8,
	pub max_retransmits: u8,
	pub max_server_timeouts: usize,
	pub probe_name: String,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			max_inflight: 64,
			timeout: Duration::from_secs(5),
			max_reissues: 1,
			max_retransmits: 3,
			max_server_timeouts: 3,
			probe_name: "www.google.com".into(),
		}
	}
}

/// The resolver: nameserver pool, request queues, and search
/// configuration, all owned by one actor.
pub struct Resolver {
	pub(crate) pool: Pool,
	pub(crate) requests: Slab<Request>,
	/// Inflight request slots, oldest first; ids are pairwise distinct.
	pub(crate) inflight: VecDeque<usize>,
	/// Waiting request slots, oldest first.
	pub(crate) waiting: VecDeque<usize>,
	pub(crate) search: Option<Rc<SearchState>>,
	pub(crate) opts: Options,
}

impl Resolver {
	/// An unconfigured resolver: no nameservers, no search list.
	pub fn init(_cx: CX![]) -> Option<Self> {
		Some(Self {
			pool: Pool::default(),
			requests: Slab::new(),
			inflight: VecDeque::new(),
			waiting: VecDeque::new(),
			search: None,
			opts: Options::default(),
		})
	}

	/// A resolver loaded from the platform configuration.
	pub fn init_system(cx: CX![]) -> Option<Self> {
		let mut this = Self::init(cx)?;

		if let Err(err) = this.apply_resolv_conf(cx, config::DNS_OPTIONS_ALL, Path::new("/etc/resolv.conf")) {
			warn!("Failed to load the system resolver configuration: {err:?}");
		}

		Some(this)
	}

	/// Looks up the A records for `name`. The search list applies unless
	/// `QUERY_NO_SEARCH` is set. `ret` fires exactly once: on the first
	/// success, on an unrecoverable error, or once every candidate is
	/// exhausted.
	pub fn resolve_ipv4(&mut self, cx: CX![], name: String, flags: u32, ret: Ret<Answer>) {
		let search = (flags & QUERY_NO_SEARCH == 0)
			.then(|| self.search.clone())
			.flatten()
			.map(|state| SearchCtx::new(state, name.clone()));

		let qname = match search.as_ref().and_then(SearchCtx::current) {
			Some(candidate) => candidate,
			None => name,
		};

		self.start_request(cx, qname, Type::A, search, ret);
	}

	/// Looks up the PTR record for an IPv4 address via
	/// `d.c.b.a.in-addr.arpa`. Reverse lookups never touch the search
	/// list.
	pub fn resolve_reverse(&mut self, cx: CX![], addr: Ipv4Addr, _flags: u32, ret: Ret<Answer>) {
		let [a, b, c, d] = addr.octets();
		let name = format!("{d}.{c}.{b}.{a}.in-addr.arpa");

		self.start_request(cx, name, Type::Ptr, None, ret);
	}

	/// Adds a recursive nameserver on port 53. Duplicates are refused.
	pub fn nameserver_add(&mut self, cx: CX![], address: Ipv4Addr) {
		let _ = self.add_server(cx, (address, DNS_PORT).into());
	}

	/// Adds a nameserver with an explicit port.
	pub fn nameserver_sockaddr_add(&mut self, cx: CX![], address: SocketAddr) {
		let _ = self.add_server(cx, address);
	}

	/// Parses `a.b.c.d` or `a.b.c.d:port` and adds the server.
	pub fn nameserver_ip_add(&mut self, cx: CX![], text: String) {
		let parsed = text
			.parse::<SocketAddr>()
			.ok()
			.or_else(|| text.parse::<Ipv4Addr>().ok().map(|ip| SocketAddr::from((ip, DNS_PORT))));

		match parsed {
			Some(address) => {
				let _ = self.add_server(cx, address);
			}
			None => warn!("Not a nameserver address: {text:?}"),
		}
	}

	/// Reports the pool size, UP and DOWN servers both.
	pub fn count_nameservers(&mut self, _cx: CX![], ret: Ret<usize>) {
		ret.ret(self.pool.len());
	}

	/// Drops every configured search domain.
	pub fn search_clear(&mut self, _cx: CX![]) {
		self.edit_search(|s| s.domains.clear());
	}

	/// Appends a postfix domain; domains are tried in the order added.
	pub fn search_add(&mut self, _cx: CX![], domain: String) {
		self.edit_search(move |s| s.domains.push(domain));
	}

	/// Sets the dot-count threshold at which a name is tried verbatim
	/// before the postfixes.
	pub fn search_ndots_set(&mut self, _cx: CX![], ndots: usize) {
		self.edit_search(|s| s.ndots = ndots);
	}

	/// Changes the canary name probes resolve (default `www.google.com`).
	pub fn set_probe_name(&mut self, _cx: CX![], name: String) {
		self.opts.probe_name = name;
	}

	/// Applies a resolv.conf-style file. A missing file still applies the
	/// defaults selected by `flags` before the failure is reported.
	pub fn resolv_conf_parse(&mut self, cx: CX![], flags: u32, path: PathBuf, ret: Ret<Result<(), ParseError>>) {
		ret.ret(self.apply_resolv_conf(cx, flags, &path));
	}

	pub(crate) fn edit_search(&mut self, edit: impl FnOnce(&mut SearchState)) {
		let state = self.search.get_or_insert_with(Default::default);
		edit(Rc::make_mut(state));
	}
}

/// Failure to add a nameserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
	/// The address is already in the pool.
	Duplicate,
	/// Socket setup failed.
	Socket,
}
