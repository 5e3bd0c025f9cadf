//! The server port end to end: a query on the wire, answered through the
//! callback API.

use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use dns::{ServerPort, ServerRequest};
use stakker::{actor, fwd_do, ret_nop};

fn query_packet(id: u16, name: &str, ty: u16) -> Vec<u8> {
	let mut pkt = Vec::new();

	pkt.extend_from_slice(&id.to_be_bytes());
	pkt.extend_from_slice(&0x0100u16.to_be_bytes());
	pkt.extend_from_slice(&1u16.to_be_bytes());
	pkt.extend_from_slice(&[0; 6]);

	for label in name.split('.') {
		pkt.push(label.len() as u8);
		pkt.extend_from_slice(label.as_bytes());
	}

	pkt.push(0);
	pkt.extend_from_slice(&ty.to_be_bytes());
	pkt.extend_from_slice(&1u16.to_be_bytes());

	pkt
}

#[test]
fn answers_a_queries_authoritatively() {
	let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
	let address = socket.local_addr().unwrap();

	let client = UdpSocket::bind("127.0.0.1:0").unwrap();
	client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

	let s = &mut runtime::init();

	let _port = actor!(
		s,
		ServerPort::init(
			socket,
			fwd_do!(|mut req: ServerRequest| {
				assert_eq!(req.questions().len(), 1);

				let name = req.questions()[0].name.clone();
				req.set_authoritative(true);
				req.add_a_reply(&name, &[Ipv4Addr::new(192, 0, 2, 1)], 120);
				req.respond();
			})
		),
		ret_nop!()
	);

	s.run(Instant::now(), false);

	client.send_to(&query_packet(77, "box.example.com", 1), address).unwrap();

	runtime::poll_once(Some(Duration::from_secs(2))).unwrap();
	s.run(Instant::now(), false);

	let mut buf = [0u8; 1500];
	let (n, from) = client.recv_from(&mut buf).unwrap();
	let pkt = &buf[..n];

	assert_eq!(from, address);

	// Same id; QR, AA and the copied RD bit; one question, one answer.
	assert_eq!(&pkt[0..2], &77u16.to_be_bytes());
	assert_eq!(pkt[2], 0x85);
	assert_eq!(pkt[3], 0x00);
	assert_eq!(&pkt[4..6], &1u16.to_be_bytes());
	assert_eq!(&pkt[6..8], &1u16.to_be_bytes());

	// The answer names the question by a compression pointer, and carries
	// the address with the configured TTL.
	let answer_at = 12 + 17 + 4;
	assert_eq!(&pkt[answer_at..answer_at + 2], &[0xc0, 12]);
	assert_eq!(&pkt[answer_at + 2..answer_at + 4], &1u16.to_be_bytes());
	assert_eq!(&pkt[answer_at + 6..answer_at + 10], &120u32.to_be_bytes());
	assert_eq!(&pkt[answer_at + 10..answer_at + 12], &4u16.to_be_bytes());
	assert_eq!(&pkt[answer_at + 12..answer_at + 16], &[192, 0, 2, 1]);
}

#[test]
fn dropped_requests_stay_unanswered() {
	let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
	let address = socket.local_addr().unwrap();

	let client = UdpSocket::bind("127.0.0.1:0").unwrap();
	client.set_read_timeout(Some(Duration::from_millis(300))).unwrap();

	let s = &mut runtime::init();

	let _port = actor!(
		s,
		ServerPort::init(socket, fwd_do!(|req: ServerRequest| req.discard())),
		ret_nop!()
	);

	s.run(Instant::now(), false);

	client.send_to(&query_packet(5, "quiet.example", 1), address).unwrap();

	runtime::poll_once(Some(Duration::from_secs(1))).unwrap();
	s.run(Instant::now(), false);

	let mut buf = [0u8; 32];
	assert!(client.recv_from(&mut buf).is_err());
}
