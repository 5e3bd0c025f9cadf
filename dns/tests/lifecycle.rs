//! Timer-driven behavior under virtual time, and suspension semantics.

use core::cell::RefCell;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::rc::Rc;
use std::time::{Duration, Instant};

use dns::{Answer, Error, Resolver, QUERY_NO_SEARCH};
use stakker::{actor, call, ret_nop, ret_some_do, Stakker};

/// A nameserver that never answers.
fn silent_server() -> UdpSocket {
	let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
	socket.set_nonblocking(true).unwrap();
	socket
}

fn drain(socket: &UdpSocket) -> Vec<Vec<u8>> {
	let mut buf = [0u8; 1500];
	let mut packets = Vec::new();

	loop {
		match socket.recv_from(&mut buf) {
			Ok((n, _)) => packets.push(buf[..n].to_vec()),
			Err(err) if err.kind() == ErrorKind::WouldBlock => return packets,
			Err(err) => panic!("recv failed: {err}"),
		}
	}
}

fn qname(pkt: &[u8]) -> String {
	let mut off = 12;
	let mut out = String::new();

	loop {
		let len = pkt[off] as usize;

		if len == 0 {
			return out;
		}

		if !out.is_empty() {
			out.push('.');
		}

		out.push_str(std::str::from_utf8(&pkt[off + 1..off + 1 + len]).unwrap());
		off += 1 + len;
	}
}

#[test]
fn unanswered_requests_retransmit_then_time_out() {
	let sink = silent_server();

	let t0 = Instant::now();
	let mut stakker = Stakker::new(t0);
	let s = &mut stakker;

	let resolver = actor!(s, Resolver::init(), ret_nop!());
	call!([resolver], nameserver_sockaddr_add(sink.local_addr().unwrap()));

	let answer = Rc::new(RefCell::new(None));
	let seen = answer.clone();

	call!(
		[resolver],
		resolve_ipv4(
			"example.com".into(),
			QUERY_NO_SEARCH,
			ret_some_do!(move |a: Answer| *seen.borrow_mut() = Some(a))
		)
	);

	s.run(t0, false);

	// Each per-request timer fires five virtual seconds after the send;
	// the third expiry exhausts the transmit budget.
	for i in 1..=2u64 {
		s.run(t0 + Duration::from_millis(5050 * i), false);
		assert!(answer.borrow().is_none(), "gave up after only {i} timeouts");
	}

	s.run(t0 + Duration::from_millis(5050 * 3), false);

	assert_eq!(answer.borrow_mut().take(), Some(Err(Error::Timeout)));
	assert_eq!(drain(&sink).len(), 3);
}

#[test]
fn suspension_preserves_request_order() {
	let sink = silent_server();
	let address = sink.local_addr().unwrap();

	let s = &mut runtime::init();
	let resolver = actor!(s, Resolver::init(), ret_nop!());

	call!([resolver], nameserver_sockaddr_add(address));

	let answers = Rc::new(RefCell::new(Vec::new()));

	for name in ["first.example", "second.example"] {
		let seen = answers.clone();
		call!(
			[resolver],
			resolve_ipv4(
				name.into(),
				QUERY_NO_SEARCH,
				ret_some_do!(move |a: Answer| seen.borrow_mut().push(a))
			)
		);
	}

	s.run(Instant::now(), false);

	assert_eq!(drain(&sink).iter().map(|p| qname(p)).collect::<Vec<_>>(), ["first.example", "second.example"]);

	// Drop the pool; both requests go back to waiting with their FIFO
	// order intact, and a fresh pool picks them up again.
	call!([resolver], clear_and_suspend());
	s.run(Instant::now(), false);

	call!([resolver], nameserver_sockaddr_add(address));
	call!([resolver], resume());
	s.run(Instant::now(), false);

	assert_eq!(drain(&sink).iter().map(|p| qname(p)).collect::<Vec<_>>(), ["first.example", "second.example"]);
	assert!(answers.borrow().is_empty());

	// Shutting down with fail_requests delivers SHUTDOWN to both, in
	// submission order.
	call!([resolver], shutdown(true));
	s.run(Instant::now(), false);

	assert_eq!(*answers.borrow(), vec![Err(Error::Shutdown), Err(Error::Shutdown)]);
}
