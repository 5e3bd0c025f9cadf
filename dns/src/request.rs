//! The request lifecycle: the waiting and inflight queues, transmission
//! with backpressure, retransmit and reissue, the reply dispatcher, and
//! nameserver failure handling with probe-based recovery.

use core::time::Duration;
use std::net::SocketAddr;

use log::{debug, info, warn};
use rand::Rng;
use stakker::{fwd_to, ret_some_to, FixedTimerKey, Ret, CX};

use crate::pool::{Health, Nameserver, PROBE_BACKOFF};
use crate::search::SearchCtx;
use crate::wire::{self, Rcode, Type};
use crate::{AddError, Answer, Error, Reply, Resolver, TRANS_ID_NONE};

pub(crate) struct Request {
	/// The assembled query packet; the id bytes are patched at promotion.
	pub packet: Box<[u8]>,
	/// `TRANS_ID_NONE` exactly while the request is waiting.
	pub trans_id: u16,
	pub qtype: Type,
	/// Transmissions since the last (re)issue.
	pub tx_count: u8,
	/// How many times the request moved to a different server after a
	/// server-attributable failure.
	pub reissue_count: u8,
	/// The assigned server slot; `None` while waiting.
	pub ns: Option<usize>,
	/// A send is deferred until the next pump or write-ready event.
	pub transmit_me: bool,
	/// Per-request timeout, armed while a transmission is outstanding.
	pub timer: FixedTimerKey,
	/// The user callback; consumed on completion.
	pub ret: Option<Ret<Answer>>,
	/// Search expansion cursor, when the search list applies.
	pub search: Option<SearchCtx>,
	/// For probe requests, the server being probed.
	pub probe_of: Option<usize>,
}

impl Resolver {
	/// Builds the query packet and hands the request to the queues.
	pub(crate) fn start_request(&mut self, cx: CX![], name: String, qtype: Type, search: Option<SearchCtx>, ret: Ret<Answer>) {
		let packet = match wire::build_query(TRANS_ID_NONE, &name, qtype) {
			Ok(packet) => packet,
			Err(err) => {
				warn!("Cannot encode a query for {name:?}: {err:?}");
				ret.ret(Err(Error::Format));
				return;
			}
		};

		debug!("Resolving {name} ({qtype:?})");

		let slot = self.requests.insert(Request {
			packet,
			trans_id: TRANS_ID_NONE,
			qtype,
			tx_count: 0,
			reissue_count: 0,
			ns: None,
			transmit_me: false,
			timer: FixedTimerKey::default(),
			ret: Some(ret),
			search,
			probe_of: None,
		});

		self.submit(cx, slot, false);
	}

	/// Queues or transmits a new request. Probes pass `force` and bypass
	/// the capacity check.
	fn submit(&mut self, cx: CX![], slot: usize, force: bool) {
		if force || self.inflight.len() < self.opts.max_inflight {
			self.promote(cx, slot);
		} else {
			self.waiting.push_back(slot);
		}
	}

	/// Moves a request into the inflight queue: allocates an id, patches
	/// it into the packet, picks a server unless one was forced, and
	/// transmits.
	fn promote(&mut self, cx: CX![], slot: usize) {
		let id = self.alloc_trans_id();

		let req = &mut self.requests[slot];
		req.trans_id = id;
		req.packet[0..2].copy_from_slice(&id.to_be_bytes());

		if req.ns.is_none() {
			req.ns = self.pool.pick();
		}

		self.inflight.push_back(slot);

		if self.requests[slot].ns.is_none() {
			warn!("No nameservers configured; failing the request");
			self.complete(cx, slot, Err(Error::ServerFailed));
			return;
		}

		self.transmit(cx, slot);
	}

	/// A fresh transaction id: never the reserved sentinel, never one
	/// already in flight. Inflight is bounded, so the scan is short and
	/// the loop terminates quickly.
	fn alloc_trans_id(&self) -> u16 {
		let mut rng = rand::thread_rng();

		loop {
			let id: u16 = rng.gen();

			if id == TRANS_ID_NONE {
				continue;
			}

			if !self.inflight.iter().any(|&s| self.requests[s].trans_id == id) {
				return id;
			}
		}
	}

	/// Sends the packet on the assigned server's socket.
	fn transmit(&mut self, cx: CX![], slot: usize) {
		let Some(ns_slot) = self.requests[slot].ns else { return };
		let Some(ns) = self.pool.servers.get_mut(ns_slot) else { return };

		if ns.choked {
			self.requests[slot].transmit_me = true;
			return;
		}

		match ns.io.send(&self.requests[slot].packet) {
			Ok(true) => {
				let req = &mut self.requests[slot];
				req.tx_count += 1;
				req.transmit_me = false;

				self.arm_timeout(cx, slot);
			}
			Ok(false) => {
				// Backpressure: hold the send until write-readiness.
				debug!("Nameserver {} is choked; deferring the send", ns.address);

				ns.choked = true;
				self.requests[slot].transmit_me = true;
			}
			Err(()) => {
				// A hard send error condemns the server. The timer still
				// runs so the timeout path retries via a new server.
				self.nameserver_failed(cx, ns_slot, "send failed");
				self.arm_timeout(cx, slot);
			}
		}
	}

	fn arm_timeout(&mut self, cx: CX![], slot: usize) {
		let timeout = self.opts.timeout;
		let actor = cx.access_actor().clone();
		let req = &mut self.requests[slot];

		cx.timer_del(req.timer);
		req.timer = cx.after(timeout, move |s| actor.apply(s, move |this, cx| this.request_timeout(cx, slot)));
	}

	/// Promotes waiting requests while capacity lasts, then flushes the
	/// deferred sends.
	pub(crate) fn pump(&mut self, cx: CX![]) {
		while self.inflight.len() < self.opts.max_inflight {
			let Some(slot) = self.waiting.pop_front() else { break };
			self.promote(cx, slot);
		}

		let deferred: Vec<usize> = self.inflight.iter().copied().filter(|&s| self.requests[s].transmit_me).collect();

		for slot in deferred {
			if self.requests.contains(slot) && self.requests[slot].transmit_me {
				self.transmit(cx, slot);
			}
		}
	}

	/// Delivers the outcome and releases the request.
	fn complete(&mut self, cx: CX![], slot: usize, answer: Answer) {
		let mut req = self.requests.remove(slot);

		cx.timer_del(req.timer);

		if req.trans_id == TRANS_ID_NONE {
			self.waiting.retain(|&s| s != slot);
		} else {
			self.inflight.retain(|&s| s != slot);
		}

		if let Some(ret) = req.ret.take() {
			ret.ret(answer);
		}
	}

	/// The per-request timeout fired: blame the server, then retransmit
	/// or give up.
	fn request_timeout(&mut self, cx: CX![], slot: usize) {
		if !self.requests.contains(slot) {
			return;
		}

		self.requests[slot].timer = FixedTimerKey::default();

		if let Some(ns_slot) = self.requests[slot].ns {
			let failed = match self.pool.servers.get_mut(ns_slot) {
				Some(ns) => {
					ns.timedout += 1;
					ns.timedout >= self.opts.max_server_timeouts
				}
				None => false,
			};

			if failed {
				self.nameserver_failed(cx, ns_slot, "request timed out");
			}
		}

		let req = &self.requests[slot];

		if usize::from(req.tx_count) >= usize::from(self.opts.max_retransmits) {
			debug!("Request 0x{:x} timed out after {} transmissions", req.trans_id, req.tx_count);
			self.complete(cx, slot, Err(Error::Timeout));
		} else {
			self.transmit(cx, slot);
		}

		self.pump(cx);
	}

	/// A datagram arrived on a nameserver socket.
	pub(crate) fn packet_in(&mut self, cx: CX![], ns_slot: usize, _src: SocketAddr, pkt: Box<[u8]>) {
		if let Some(ns) = self.pool.servers.get_mut(ns_slot) {
			// Any datagram is evidence of liveness.
			if ns.timedout > 0 {
				ns.timedout = 0;
			}
		}

		if pkt.len() < wire::HEADER_LEN {
			warn!("Dropping a runt datagram ({} bytes)", pkt.len());
			return;
		}

		let id = u16::from_be_bytes([pkt[0], pkt[1]]);

		let Some(slot) = self.inflight.iter().copied().find(|&s| self.requests[s].trans_id == id) else {
			warn!("No in-flight request matches reply 0x{id:x}");
			return;
		};

		let parsed = match wire::parse_reply(&pkt, self.requests[slot].qtype) {
			Ok(parsed) => parsed,
			Err(err) => {
				debug!("Undecodable reply for 0x{id:x}: {err:?}");
				self.complete(cx, slot, Err(Error::Unknown));
				self.pump(cx);
				return;
			}
		};

		if !parsed.flags.qr() {
			// A question on a client socket is nothing we asked for.
			return;
		}

		self.reply_handle(cx, slot, parsed.flags, parsed.reply);
	}

	/// Routes a decoded reply: success, server blame (reissue), search
	/// continuation, or delivery of the error.
	fn reply_handle(&mut self, cx: CX![], slot: usize, flags: wire::Flags, reply: Option<Reply>) {
		let error = if flags.tc() {
			Error::Truncated
		} else {
			match flags.rcode() {
				Rcode::Ok => match reply {
					Some(reply) => {
						if let Some(ns_slot) = self.requests[slot].ns {
							self.server_up(cx, ns_slot);
						}

						self.complete(cx, slot, Ok(reply));
						self.pump(cx);
						return;
					}
					// A clean rcode with no usable records.
					None => Error::Unknown,
				},
				Rcode::FormatErr => Error::Format,
				Rcode::ServerFailure => Error::ServerFailed,
				Rcode::NameErr => Error::NotExist,
				Rcode::NotImplemented => Error::NotImplemented,
				Rcode::Refused => Error::Refused,
				Rcode::Reserved => Error::Unknown,
			}
		};

		match error {
			Error::ServerFailed | Error::NotImplemented | Error::Refused
				if self.requests[slot].reissue_count < self.opts.max_reissues =>
			{
				if self.reissue(cx, slot) {
					self.pump(cx);
					return;
				}
			}
			Error::NotExist if self.requests[slot].qtype != Type::Ptr => {
				if self.search_advance(cx, slot) {
					self.pump(cx);
					return;
				}
			}
			_ => {}
		}

		self.complete(cx, slot, Err(error));
		self.pump(cx);
	}

	/// Moves a request to a different server after a server-attributable
	/// failure. Fails when no other server can be picked.
	fn reissue(&mut self, cx: CX![], slot: usize) -> bool {
		let Some(old) = self.requests[slot].ns else { return false };

		self.nameserver_failed(cx, old, "returned an error");

		let picked = self.pool.pick();

		if picked.is_none() || picked == Some(old) {
			return false;
		}

		let req = &mut self.requests[slot];

		debug!("Reissuing 0x{:x} on another nameserver", req.trans_id);

		req.ns = picked;
		req.tx_count = 0;
		req.reissue_count += 1;
		req.transmit_me = true;

		cx.timer_del(req.timer);
		req.timer = FixedTimerKey::default();

		true
	}

	/// Tries the next search candidate in place of delivering NOTEXIST.
	fn search_advance(&mut self, cx: CX![], slot: usize) -> bool {
		let req = &mut self.requests[slot];

		let Some(search) = req.search.as_mut() else { return false };
		let Some(name) = search.advance() else { return false };

		let packet = match wire::build_query(TRANS_ID_NONE, &name, req.qtype) {
			Ok(packet) => packet,
			Err(err) => {
				warn!("Cannot encode the search candidate {name:?}: {err:?}");
				return false;
			}
		};

		debug!("Name not found; trying {name} next");

		req.packet = packet;
		req.tx_count = 0;
		req.reissue_count = 0;
		req.transmit_me = false;
		req.trans_id = TRANS_ID_NONE;
		req.ns = None;

		cx.timer_del(req.timer);
		req.timer = FixedTimerKey::default();

		self.inflight.retain(|&s| s != slot);
		self.submit(cx, slot, false);

		true
	}

	/// The kernel drained a server socket; resend what was deferred.
	pub(crate) fn server_writable(&mut self, cx: CX![], ns_slot: usize) {
		if let Some(ns) = self.pool.servers.get_mut(ns_slot) {
			ns.choked = false;
		}

		self.pump(cx);
	}

	/// Takes a server out of rotation and schedules recovery probes.
	/// Requests bound to it that were never sent move to a freshly picked
	/// server.
	fn nameserver_failed(&mut self, cx: CX![], ns_slot: usize, why: &str) {
		let Some(ns) = self.pool.servers.get_mut(ns_slot) else { return };

		if ns.state == Health::Down {
			return;
		}

		warn!("Nameserver {} has failed: {why}", ns.address);

		ns.state = Health::Down;
		ns.failed_times = 1;
		ns.timedout = 0;
		self.pool.good -= 1;

		self.arm_probe(cx, ns_slot, PROBE_BACKOFF[0]);

		let stranded: Vec<usize> = self
			.inflight
			.iter()
			.copied()
			.filter(|&s| self.requests[s].ns == Some(ns_slot) && self.requests[s].tx_count == 0)
			.collect();

		for slot in stranded {
			self.requests[slot].ns = self.pool.pick();
			self.requests[slot].transmit_me = true;
		}
	}

	fn arm_probe(&mut self, cx: CX![], ns_slot: usize, delay: Duration) {
		let actor = cx.access_actor().clone();
		let ns = &mut self.pool.servers[ns_slot];

		cx.timer_del(ns.probe_timer);
		ns.probe_timer = cx.after(delay, move |s| actor.apply(s, move |this, cx| this.probe_fire(cx, ns_slot)));
	}

	/// Sends the canary query to a DOWN server, bypassing the inflight
	/// capacity check.
	fn probe_fire(&mut self, cx: CX![], ns_slot: usize) {
		let Some(ns) = self.pool.servers.get_mut(ns_slot) else { return };

		if ns.state == Health::Up {
			return;
		}

		ns.probe_timer = FixedTimerKey::default();
		let address = ns.address;

		let name = self.opts.probe_name.clone();
		info!("Probing nameserver {address} with {name}");

		let packet = match wire::build_query(TRANS_ID_NONE, &name, Type::A) {
			Ok(packet) => packet,
			Err(err) => {
				warn!("Cannot encode the probe query {name:?}: {err:?}");
				return;
			}
		};

		let ret = ret_some_to!([cx], probe_result(ns_slot) as (Answer));

		let slot = self.requests.insert(Request {
			packet,
			trans_id: TRANS_ID_NONE,
			qtype: Type::A,
			tx_count: 0,
			reissue_count: 0,
			ns: Some(ns_slot),
			transmit_me: false,
			timer: FixedTimerKey::default(),
			ret: Some(ret),
			search: None,
			probe_of: Some(ns_slot),
		});

		self.submit(cx, slot, true);
	}

	/// Probe outcome: NONE or NOTEXIST prove liveness; anything else
	/// backs off and re-probes.
	fn probe_result(&mut self, cx: CX![], ns_slot: usize, answer: Answer) {
		let Some(ns) = self.pool.servers.get_mut(ns_slot) else { return };

		if ns.state == Health::Up {
			return;
		}

		match answer {
			Ok(_) | Err(Error::NotExist) => {
				self.server_up(cx, ns_slot);
				self.pump(cx);
			}
			Err(err) => {
				ns.failed_times += 1;

				let address = ns.address;
				let delay = PROBE_BACKOFF[(ns.failed_times - 1).min(PROBE_BACKOFF.len() - 1)];

				debug!("Nameserver {address} is still down ({err:?}); next probe in {delay:?}");

				self.arm_probe(cx, ns_slot, delay);
			}
		}
	}

	/// Returns a DOWN server to rotation; any accepted reply is proof of
	/// life.
	fn server_up(&mut self, cx: CX![], ns_slot: usize) {
		let Some(ns) = self.pool.servers.get_mut(ns_slot) else { return };

		if ns.state == Health::Up {
			return;
		}

		info!("Nameserver {} is back up", ns.address);

		ns.state = Health::Up;
		ns.failed_times = 0;
		ns.timedout = 0;
		ns.choked = false;

		cx.timer_del(ns.probe_timer);
		ns.probe_timer = FixedTimerKey::default();

		self.pool.good += 1;
	}

	/// Connects a socket to a new server and registers it with the
	/// reactor.
	pub(crate) fn add_server(&mut self, cx: CX![], address: SocketAddr) -> Result<usize, AddError> {
		if self.pool.find(address).is_some() {
			warn!("Nameserver {address} is already configured");
			return Err(AddError::Duplicate);
		}

		let slot = self.pool.servers.vacant_key();

		let read = fwd_to!([cx], packet_in(slot) as (SocketAddr, Box<[u8]>));
		let writable = fwd_to!([cx], server_writable(slot) as ());

		let ns = Nameserver::connect(address, read, writable).ok_or(AddError::Socket)?;

		self.pool.insert(ns);
		info!("Using nameserver {address}");

		self.pump(cx);

		Ok(slot)
	}

	/// Tears down every nameserver and parks the in-flight requests back
	/// at the head of the waiting queue, in order, with their counters
	/// zeroed. [`Resolver::resume`] picks them up again.
	pub fn clear_and_suspend(&mut self, cx: CX![]) {
		info!("Suspending: dropping {} nameservers", self.pool.len());

		// Probes belong to the old pool; they die with it.
		let probes: Vec<usize> = self.inflight.iter().copied().filter(|&s| self.requests[s].probe_of.is_some()).collect();

		for slot in probes {
			let req = self.requests.remove(slot);
			cx.timer_del(req.timer);
			self.inflight.retain(|&s| s != slot);
		}

		for (_, ns) in self.pool.servers.iter() {
			cx.timer_del(ns.probe_timer);
		}

		while let Some(slot) = self.inflight.pop_back() {
			let req = &mut self.requests[slot];

			cx.timer_del(req.timer);
			req.timer = FixedTimerKey::default();
			req.trans_id = TRANS_ID_NONE;
			req.ns = None;
			req.tx_count = 0;
			req.reissue_count = 0;
			req.transmit_me = false;

			self.waiting.push_front(slot);
		}

		self.pool.clear();
	}

	/// Promotes whatever fits after a suspension.
	pub fn resume(&mut self, cx: CX![]) {
		self.pump(cx);
	}

	/// Releases everything. With `fail_requests`, every pending request
	/// completes synchronously with [`Error::Shutdown`]; otherwise they
	/// are discarded silently.
	pub fn shutdown(&mut self, cx: CX![], fail_requests: bool) {
		info!("Shutting down the resolver");

		for (_, ns) in self.pool.servers.iter() {
			cx.timer_del(ns.probe_timer);
		}

		self.pool.clear();

		let pending: Vec<usize> = self.inflight.iter().chain(self.waiting.iter()).copied().collect();

		for slot in pending {
			let mut req = self.requests.remove(slot);

			cx.timer_del(req.timer);

			if let Some(ret) = req.ret.take() {
				if fail_requests && req.probe_of.is_none() {
					ret.ret(Err(Error::Shutdown));
				}
			}
		}

		self.inflight.clear();
		self.waiting.clear();
		self.search = None;
	}
}
