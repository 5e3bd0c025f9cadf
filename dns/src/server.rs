//! The server port: accepts queries on a bound UDP socket, hands them to
//! a callback, and ships the assembled responses with backpressure.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use log::{debug, error, warn};
use runtime::{Io, MAX_DATAGRAM};
use stakker::{call, fwd_to, Actor, Fwd, CX};
use utils::error::*;

use crate::wire::{self, Payload, Question, Record, Type};

/// Response sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
	Answer,
	Authority,
	Additional,
}

/// A UDP port that serves DNS queries.
///
/// Every decoded query is handed to the callback as a [`ServerRequest`].
/// The callback attaches records and calls [`ServerRequest::respond`], or
/// drops the request to answer nothing.
pub struct ServerPort {
	io: Io,
	callback: Fwd<ServerRequest>,
	/// Responses the kernel would not take yet, oldest first.
	pending: VecDeque<(SocketAddr, Box<[u8]>)>,
}

impl ServerPort {
	pub fn init(cx: CX![], socket: UdpSocket, callback: Fwd<ServerRequest>) -> Option<Self> {
		socket.set_nonblocking(true).ok_or(|err| error!("Cannot make the server socket nonblocking: {err}"))?;

		let read = fwd_to!([cx], read() as (SocketAddr, Box<[u8]>));
		let writable = fwd_to!([cx], writable() as ());
		let io = Io::register(socket, read, writable).ok()?;

		Some(Self { io, callback, pending: VecDeque::new() })
	}

	fn read(&mut self, cx: CX![], src: SocketAddr, pkt: Box<[u8]>) {
		let parsed = match wire::parse_query(&pkt) {
			Ok(parsed) => parsed,
			Err(err) => {
				debug!("Dropping an undecodable query from {src}: {err:?}");
				return;
			}
		};

		if parsed.flags.qr() {
			// An answer has no business on a server port.
			return;
		}

		self.callback.fwd(ServerRequest {
			id: parsed.id,
			flags: parsed.flags.into(),
			src,
			questions: parsed.questions,
			sections: Default::default(),
			rcode: 0,
			authoritative: false,
			response: None,
			port: cx.access_actor().clone(),
		});
	}

	/// Serialises (at most once) and sends a response. On backpressure the
	/// packet joins the pending queue until the socket drains.
	pub fn respond(&mut self, _cx: CX![], mut request: ServerRequest) {
		let response = match request.response.take() {
			Some(response) => response,
			None => {
				let sections = [&request.sections[0][..], &request.sections[1][..], &request.sections[2][..]];

				match wire::build_response(request.id, request.flags, request.rcode, request.authoritative, &request.questions, sections, MAX_DATAGRAM) {
					Ok(response) => response,
					Err(err) => {
						warn!("Cannot assemble a response for 0x{:x}: {err:?}", request.id);
						return;
					}
				}
			}
		};

		self.ship(request.src, response);
	}

	fn ship(&mut self, dst: SocketAddr, response: Box<[u8]>) {
		if !self.pending.is_empty() {
			// Replies leave strictly oldest-first.
			self.pending.push_back((dst, response));
			return;
		}

		match self.io.send_to(&response, dst) {
			Ok(true) => {}
			Ok(false) => self.pending.push_back((dst, response)),
			Err(()) => warn!("Failed to send a response to {dst}"),
		}
	}

	fn writable(&mut self, _cx: CX![]) {
		while let Some((dst, response)) = self.pending.pop_front() {
			match self.io.send_to(&response, dst) {
				Ok(true) => {}
				Ok(false) => {
					self.pending.push_front((dst, response));
					break;
				}
				Err(()) => warn!("Failed to send a queued response to {dst}"),
			}
		}
	}
}

/// One incoming query being answered: the parsed questions, the records
/// attached so far, and the way back to the owning port.
pub struct ServerRequest {
	id: u16,
	flags: u16,
	src: SocketAddr,
	questions: Vec<Question>,
	sections: [Vec<Record>; 3],
	rcode: u8,
	authoritative: bool,
	/// The serialised response, built at most once.
	response: Option<Box<[u8]>>,
	port: Actor<ServerPort>,
}

impl ServerRequest {
	/// The questions asked, in packet order.
	pub fn questions(&self) -> &[Question] {
		&self.questions
	}

	/// Where the query came from.
	pub fn source(&self) -> SocketAddr {
		self.src
	}

	pub fn id(&self) -> u16 {
		self.id
	}

	/// Sets the response code (0 = no error).
	pub fn set_rcode(&mut self, rcode: u8) {
		self.rcode = rcode;
	}

	/// Marks the response authoritative.
	pub fn set_authoritative(&mut self, aa: bool) {
		self.authoritative = aa;
	}

	/// Attaches a raw-payload record to an arbitrary section.
	pub fn add_record(&mut self, section: Section, name: &str, ty: Type, ttl: u32, payload: Vec<u8>) {
		self.push(section, name, ty, ttl, Payload::Raw(payload));
	}

	/// Attaches one A record carrying `addresses`.
	pub fn add_a_reply(&mut self, name: &str, addresses: &[Ipv4Addr], ttl: u32) {
		let bytes = addresses.iter().flat_map(|a| a.octets()).collect();
		self.push(Section::Answer, name, Type::A, ttl, Payload::Raw(bytes));
	}

	/// Attaches one AAAA record carrying `addresses`.
	pub fn add_aaaa_reply(&mut self, name: &str, addresses: &[Ipv6Addr], ttl: u32) {
		let bytes = addresses.iter().flat_map(|a| a.octets()).collect();
		self.push(Section::Answer, name, Type::Aaaa, ttl, Payload::Raw(bytes));
	}

	/// Attaches a PTR record mapping `name` to `hostname`.
	pub fn add_ptr_reply(&mut self, name: &str, hostname: &str, ttl: u32) {
		self.push(Section::Answer, name, Type::Ptr, ttl, Payload::Name(hostname.to_owned()));
	}

	/// Attaches a CNAME record aliasing `name` to `alias`.
	pub fn add_cname_reply(&mut self, name: &str, alias: &str, ttl: u32) {
		self.push(Section::Answer, name, Type::Cname, ttl, Payload::Name(alias.to_owned()));
	}

	fn push(&mut self, section: Section, name: &str, ty: Type, ttl: u32, payload: Payload) {
		// Records attached after a build would otherwise be lost.
		self.response = None;

		self.sections[section as usize].push(Record {
			name: name.to_owned(),
			ty,
			class: wire::CLASS_IN,
			ttl,
			payload,
		});
	}

	/// Hands the request back to its port for serialisation and delivery.
	pub fn respond(self) {
		let port = self.port.clone();
		call!([port], respond(self));
	}

	/// Discards the request without answering.
	pub fn discard(self) {}
}
