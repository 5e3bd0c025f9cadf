//! RFC 1035 wire format: names with pointer compression, query and
//! response assembly, reply decoding.

use core::net::Ipv4Addr;

use bilge::prelude::*;

use crate::Reply;

pub(crate) const CLASS_IN: u16 = 1;
pub(crate) const HEADER_LEN: usize = 12;

/// At most this many addresses are collected from the A records of one
/// reply.
pub(crate) const MAX_ADDRS: usize = 4;

const MAX_LABEL: usize = 63;
const MAX_NAME: usize = 255;

/// Questions past this count mark the packet as garbage rather than a
/// query worth answering.
const MAX_QUESTIONS: u16 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
	/// A label exceeds 63 bytes.
	LabelTooLong,
	/// A name exceeds 255 bytes.
	NameTooLong,
	/// The output no longer fits the datagram.
	Overflow,
	/// Truncated or inconsistent packet data, or an empty label.
	Malformed,
	/// Compression pointers form a cycle.
	PointerLoop,
}

/// The record types this resolver speaks. AAAA is carried and served but
/// never decoded from upstream replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Type {
	A = 1,
	Cname = 5,
	Ptr = 12,
	Aaaa = 28,
}

impl TryFrom<u16> for Type {
	type Error = WireError;

	fn try_from(v: u16) -> Result<Self, WireError> {
		match v {
			1 => Ok(Type::A),
			5 => Ok(Type::Cname),
			12 => Ok(Type::Ptr),
			28 => Ok(Type::Aaaa),
			_ => Err(WireError::Malformed),
		}
	}
}

#[bitsize(4)]
#[derive(FromBits)]
pub(crate) enum Opcode {
	/// a standard query
	Query = 0,
	/// an inverse query
	IQuery = 1,
	/// a server status request
	Status = 2,
	/// reserved
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits)]
pub(crate) enum Rcode {
	/// No error condition
	Ok = 0,
	/// Format error - the name server was unable to interpret the query.
	FormatErr = 1,
	/// Server failure - the name server was unable to process this query.
	ServerFailure = 2,
	/// Name error - the domain name referenced in the query does not exist.
	NameErr = 3,
	/// Not implemented - the name server does not support the requested kind of query.
	NotImplemented = 4,
	/// Refused - the name server refuses to perform the specified operation.
	Refused = 5,
	/// Reserved
	#[fallback]
	Reserved,
}

#[bitsize(16)]
#[derive(FromBits)]
pub(crate) struct Flags {
	/// Response code - this 4 bit field is set as part of responses.
	pub rcode: Rcode,
	/// Reserved for future use. Must be zero in all queries and responses.
	pub z: u3,
	/// Recursion available - set in a response when the server offers recursion.
	pub ra: bool,
	/// Recursion desired - set in a query and copied into the response.
	pub rd: bool,
	/// Truncation - the message was cut to fit the transmission channel.
	pub tc: bool,
	/// Authoritative answer - the responding server is an authority for the name.
	pub aa: bool,
	/// The kind of query in this message, copied into the response.
	pub opcode: Opcode,
	/// Whether this message is a query (0) or a response (1).
	pub qr: bool,
}

/// The flag word every outbound question carries: standard query,
/// recursion desired.
pub(crate) fn query_flags() -> Flags {
	Flags::new(Rcode::Ok, u3::new(0), false, true, false, false, Opcode::Query, false)
}

/// The flag word for a response to `query`: QR set, opcode and RD copied.
pub(crate) fn response_flags(query: Flags, rcode: u8, aa: bool) -> Flags {
	Flags::new(Rcode::from(u4::new(rcode & 0xf)), u3::new(0), false, query.rd(), false, aa, query.opcode(), true)
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
	buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
	buf.extend_from_slice(&v.to_be_bytes());
}

fn read_u16(pkt: &[u8], off: usize) -> Result<u16, WireError> {
	let b = pkt.get(off..off + 2).ok_or(WireError::Malformed)?;
	Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(pkt: &[u8], off: usize) -> Result<u32, WireError> {
	let b = pkt.get(off..off + 4).ok_or(WireError::Malformed)?;
	Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Suffix table for emitting names with pointer compression. Capacity is
/// fixed; once full, further suffixes are emitted uncompressed.
#[derive(Default)]
pub(crate) struct CompressTable {
	entries: Vec<(String, u16)>,
}

impl CompressTable {
	const CAPACITY: usize = 128;

	fn lookup(&self, suffix: &str) -> Option<u16> {
		self.entries.iter().find(|(s, _)| s == suffix).map(|&(_, off)| off)
	}

	fn insert(&mut self, suffix: &str, off: usize) {
		// Offsets past the pointer range, and entries past capacity, are
		// silently not remembered.
		if self.entries.len() < Self::CAPACITY && off <= 0x3fff {
			self.entries.push((suffix.to_owned(), off as u16));
		}
	}

	fn len(&self) -> usize {
		self.entries.len()
	}

	fn truncate(&mut self, len: usize) {
		self.entries.truncate(len);
	}
}

/// Appends `name` to `buf` as length-prefixed labels. With a table, each
/// suffix already emitted earlier in the packet becomes a two-byte pointer
/// and encoding stops there.
pub(crate) fn name_to_labels(buf: &mut Vec<u8>, name: &str, mut table: Option<&mut CompressTable>) -> Result<(), WireError> {
	let name = name.strip_suffix('.').unwrap_or(name);

	if name.len() > MAX_NAME {
		return Err(WireError::NameTooLong);
	}

	let mut rest = name;

	while !rest.is_empty() {
		if let Some(table) = table.as_deref_mut() {
			if let Some(off) = table.lookup(rest) {
				put_u16(buf, 0xc000 | off);
				return Ok(());
			}

			table.insert(rest, buf.len());
		}

		let (label, tail) = match rest.split_once('.') {
			Some(split) => split,
			None => (rest, ""),
		};

		if label.is_empty() {
			return Err(WireError::Malformed);
		}

		if label.len() > MAX_LABEL {
			return Err(WireError::LabelTooLong);
		}

		buf.push(label.len() as u8);
		buf.extend_from_slice(label.as_bytes());

		rest = tail;
	}

	buf.push(0);

	Ok(())
}

/// Decodes a possibly-compressed name starting at `start`. Returns the name
/// (dot-separated, no trailing dot) and the offset just past it — past the
/// first pointer when one was followed.
pub(crate) fn name_parse(pkt: &[u8], start: usize) -> Result<(String, usize), WireError> {
	let mut name = String::new();
	let mut off = start;
	let mut resume = None;
	let mut hops = 0usize;

	loop {
		let &len = pkt.get(off).ok_or(WireError::Malformed)?;

		match len >> 6 {
			0b00 if len == 0 => return Ok((name, resume.unwrap_or(off + 1))),
			0b00 => {
				let label = pkt.get(off + 1..off + 1 + usize::from(len)).ok_or(WireError::Malformed)?;

				if !name.is_empty() {
					name.push('.');
				}

				if name.len() + label.len() > MAX_NAME {
					return Err(WireError::NameTooLong);
				}

				name.push_str(&String::from_utf8_lossy(label));
				off += 1 + usize::from(len);
			}
			0b11 => {
				let &lo = pkt.get(off + 1).ok_or(WireError::Malformed)?;
				let target = usize::from(u16::from_be_bytes([len & 0x3f, lo]));

				if target >= pkt.len() {
					return Err(WireError::Malformed);
				}

				// The caller resumes right after the first pointer only.
				if resume.is_none() {
					resume = Some(off + 2);
				}

				// A malformed packet can chain pointers into a cycle; the
				// hop budget bounds the walk.
				hops += 1;

				if hops > pkt.len() {
					return Err(WireError::PointerLoop);
				}

				off = target;
			}
			_ => return Err(WireError::Malformed),
		}
	}
}

/// Advances past a name without decoding it.
pub(crate) fn name_skip(pkt: &[u8], mut off: usize) -> Result<usize, WireError> {
	loop {
		let &len = pkt.get(off).ok_or(WireError::Malformed)?;

		match len >> 6 {
			0b00 if len == 0 => return Ok(off + 1),
			0b00 => off += 1 + usize::from(len),
			0b11 if off + 2 <= pkt.len() => return Ok(off + 2),
			_ => return Err(WireError::Malformed),
		}
	}
}

/// Assembles a one-question query packet.
pub(crate) fn build_query(id: u16, name: &str, ty: Type) -> Result<Box<[u8]>, WireError> {
	let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 6);

	put_u16(&mut buf, id);
	put_u16(&mut buf, query_flags().into());

	// One question, no resource records.
	put_u16(&mut buf, 1);
	put_u16(&mut buf, 0);
	put_u16(&mut buf, 0);
	put_u16(&mut buf, 0);

	name_to_labels(&mut buf, name, None)?;

	put_u16(&mut buf, ty as u16);
	put_u16(&mut buf, CLASS_IN);

	Ok(buf.into_boxed_slice())
}

pub(crate) struct ParsedReply {
	pub id: u16,
	pub flags: Flags,
	/// Decoded answer, present when the reply was an unqualified success
	/// and held records matching the question type.
	pub reply: Option<Reply>,
}

/// Decodes a reply from a recursor. Answer records are only scanned when
/// the header reports success and no truncation; the dispatcher routes
/// everything else off the flag word.
pub(crate) fn parse_reply(pkt: &[u8], qtype: Type) -> Result<ParsedReply, WireError> {
	let id = read_u16(pkt, 0)?;
	let flags = Flags::from(read_u16(pkt, 2)?);
	let qdcount = read_u16(pkt, 4)?;
	let ancount = read_u16(pkt, 6)?;

	if !matches!(flags.rcode(), Rcode::Ok) || flags.tc() {
		return Ok(ParsedReply { id, flags, reply: None });
	}

	let mut off = HEADER_LEN;

	for _ in 0..qdcount {
		off = name_skip(pkt, off)? + 4;
	}

	let mut addresses = Vec::new();
	let mut ttl_min = u32::MAX;
	let mut reply = None;

	for _ in 0..ancount {
		off = name_skip(pkt, off)?;

		let ty = read_u16(pkt, off)?;
		let class = read_u16(pkt, off + 2)?;
		let ttl = read_u32(pkt, off + 4)?;
		let rdlength = usize::from(read_u16(pkt, off + 8)?);

		off += 10;

		let rdata = pkt.get(off..off + rdlength).ok_or(WireError::Malformed)?;

		match (ty, class) {
			(1, CLASS_IN) if qtype == Type::A => {
				// A records can pack several addresses; keep at most four
				// across the whole reply and the smallest TTL among them.
				for quad in rdata.chunks_exact(4) {
					if addresses.len() < MAX_ADDRS {
						addresses.push(Ipv4Addr::new(quad[0], quad[1], quad[2], quad[3]));
					}
				}

				ttl_min = ttl_min.min(ttl);
			}
			(12, CLASS_IN) if qtype == Type::Ptr => {
				let (hostname, _) = name_parse(pkt, off)?;
				reply = Some(Reply::Ptr { hostname, ttl });
				break;
			}
			// AAAA is recognised but never decoded; everything else is
			// skipped by its RDLENGTH.
			_ => {}
		}

		off += rdlength;
	}

	if !addresses.is_empty() {
		reply = Some(Reply::A { addresses, ttl: ttl_min });
	}

	Ok(ParsedReply { id, flags, reply })
}

/// One question from an incoming query. The type is kept raw so unknown
/// types can be echoed back by the serving callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
	pub name: String,
	pub ty: u16,
	pub class: u16,
}

pub(crate) struct ParsedQuery {
	pub id: u16,
	pub flags: Flags,
	pub questions: Vec<Question>,
}

/// Decodes an incoming query on a server port.
pub(crate) fn parse_query(pkt: &[u8]) -> Result<ParsedQuery, WireError> {
	let id = read_u16(pkt, 0)?;
	let flags = Flags::from(read_u16(pkt, 2)?);
	let qdcount = read_u16(pkt, 4)?;

	if qdcount > MAX_QUESTIONS {
		return Err(WireError::Malformed);
	}

	let mut off = HEADER_LEN;
	let mut questions = Vec::with_capacity(usize::from(qdcount));

	for _ in 0..qdcount {
		let (name, next) = name_parse(pkt, off)?;
		let ty = read_u16(pkt, next)?;
		let class = read_u16(pkt, next + 2)?;

		questions.push(Question { name, ty, class });
		off = next + 4;
	}

	Ok(ParsedQuery { id, flags, questions })
}

/// A record to be emitted into a response section.
pub(crate) struct Record {
	pub name: String,
	pub ty: Type,
	pub class: u16,
	pub ttl: u32,
	pub payload: Payload,
}

/// Record payloads are either literal bytes or a name compressed at emit
/// time.
pub(crate) enum Payload {
	Raw(Vec<u8>),
	Name(String),
}

fn emit_record(buf: &mut Vec<u8>, r: &Record, table: &mut CompressTable) -> Result<(), WireError> {
	name_to_labels(buf, &r.name, Some(table))?;

	put_u16(buf, r.ty as u16);
	put_u16(buf, r.class);
	put_u32(buf, r.ttl);

	// RDLENGTH is patched once the payload, which may compress, is known.
	let len_at = buf.len();
	put_u16(buf, 0);

	match &r.payload {
		Payload::Raw(bytes) => buf.extend_from_slice(bytes),
		Payload::Name(name) => name_to_labels(buf, name, Some(table))?,
	}

	let rdlength = (buf.len() - len_at - 2) as u16;
	buf[len_at..len_at + 2].copy_from_slice(&rdlength.to_be_bytes());

	Ok(())
}

/// Serialises a response. One compression table spans the questions and
/// every section. When the packet outgrows `max`, emission rolls back to
/// the last whole record, the TC bit is set, and the counts cover only
/// what was kept.
pub(crate) fn build_response(
	id: u16,
	query_flags: u16,
	rcode: u8,
	aa: bool,
	questions: &[Question],
	sections: [&[Record]; 3],
	max: usize,
) -> Result<Box<[u8]>, WireError> {
	let mut buf = Vec::with_capacity(512);

	put_u16(&mut buf, id);
	put_u16(&mut buf, response_flags(Flags::from(query_flags), rcode, aa).into());
	put_u16(&mut buf, questions.len() as u16);

	// Section counts are patched after emission.
	put_u16(&mut buf, 0);
	put_u16(&mut buf, 0);
	put_u16(&mut buf, 0);

	let mut table = CompressTable::default();

	for q in questions {
		name_to_labels(&mut buf, &q.name, Some(&mut table))?;
		put_u16(&mut buf, q.ty);
		put_u16(&mut buf, q.class);

		if buf.len() > max {
			return Err(WireError::Overflow);
		}
	}

	let mut emitted = [0u16; 3];

	'sections: for (idx, records) in sections.iter().enumerate() {
		for r in *records {
			let mark = buf.len();
			let table_mark = table.len();

			if emit_record(&mut buf, r, &mut table).is_err() || buf.len() > max {
				// Roll back the partial record. The table must shrink with
				// it or later pointers would aim into discarded bytes.
				buf.truncate(mark);
				table.truncate(table_mark);

				buf[2] |= 0x02;
				break 'sections;
			}

			emitted[idx] += 1;
		}
	}

	for (idx, count) in emitted.iter().enumerate() {
		let at = 6 + idx * 2;
		buf[at..at + 2].copy_from_slice(&count.to_be_bytes());
	}

	Ok(buf.into_boxed_slice())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn padded() -> Vec<u8> {
		vec![0; HEADER_LEN]
	}

	#[test]
	fn name_round_trips_without_compression() {
		let mut buf = padded();
		name_to_labels(&mut buf, "www.example.com", None).unwrap();

		let (name, next) = name_parse(&buf, HEADER_LEN).unwrap();
		assert_eq!(name, "www.example.com");
		assert_eq!(next, buf.len());
	}

	#[test]
	fn trailing_dot_is_dropped() {
		let mut buf = padded();
		name_to_labels(&mut buf, "host.example.", None).unwrap();

		let (name, _) = name_parse(&buf, HEADER_LEN).unwrap();
		assert_eq!(name, "host.example");
	}

	#[test]
	fn shared_suffix_becomes_a_pointer() {
		let mut buf = padded();
		let mut table = CompressTable::default();

		name_to_labels(&mut buf, "www.example.com", Some(&mut table)).unwrap();
		let second = buf.len();
		name_to_labels(&mut buf, "mail.example.com", Some(&mut table)).unwrap();

		// "mail" plus a pointer to "example.com" at offset 16.
		assert_eq!(&buf[second..], &[4, b'm', b'a', b'i', b'l', 0xc0, 16]);

		let (name, next) = name_parse(&buf, second).unwrap();
		assert_eq!(name, "mail.example.com");
		assert_eq!(next, buf.len());
	}

	#[test]
	fn pointer_cycle_is_rejected() {
		let mut buf = padded();
		buf.extend_from_slice(&[0xc0, 14, 0xc0, 12]);

		assert_eq!(name_parse(&buf, HEADER_LEN).unwrap_err(), WireError::PointerLoop);
	}

	#[test]
	fn oversized_labels_and_names_are_rejected() {
		let mut buf = Vec::new();

		let label63 = "a".repeat(63);
		name_to_labels(&mut buf, &label63, None).unwrap();

		let label64 = "a".repeat(64);
		assert_eq!(name_to_labels(&mut buf, &label64, None).unwrap_err(), WireError::LabelTooLong);

		let long = [label63.as_str(); 4].join(".");
		assert_eq!(long.len(), 255);
		name_to_labels(&mut buf, &long, None).unwrap();

		let too_long = format!("a.{long}");
		assert_eq!(name_to_labels(&mut buf, &too_long, None).unwrap_err(), WireError::NameTooLong);
	}

	#[test]
	fn empty_labels_are_rejected() {
		let mut buf = Vec::new();
		assert_eq!(name_to_labels(&mut buf, "a..b", None).unwrap_err(), WireError::Malformed);
	}

	#[test]
	fn query_layout_matches_the_rfc() {
		let pkt = build_query(0x1234, "example.com", Type::A).unwrap();

		#[rustfmt::skip]
		let expected = [
			0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0,
			7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
			0, 1, 0, 1,
		];

		assert_eq!(&pkt[..], &expected[..]);
	}

	/// Serialises a minimal reply: the echoed question plus `records` given
	/// as (type, ttl, rdata) triples, all named by a pointer to the
	/// question name.
	fn fake_reply(id: u16, flags: u16, records: &[(u16, u32, &[u8])]) -> Vec<u8> {
		let mut buf = Vec::new();

		put_u16(&mut buf, id);
		put_u16(&mut buf, flags);
		put_u16(&mut buf, 1);
		put_u16(&mut buf, records.len() as u16);
		put_u16(&mut buf, 0);
		put_u16(&mut buf, 0);

		name_to_labels(&mut buf, "example.com", None).unwrap();
		put_u16(&mut buf, Type::A as u16);
		put_u16(&mut buf, CLASS_IN);

		for &(ty, ttl, rdata) in records {
			put_u16(&mut buf, 0xc000 | HEADER_LEN as u16);
			put_u16(&mut buf, ty);
			put_u16(&mut buf, CLASS_IN);
			put_u32(&mut buf, ttl);
			put_u16(&mut buf, rdata.len() as u16);
			buf.extend_from_slice(rdata);
		}

		buf
	}

	#[test]
	fn a_records_accumulate_with_minimum_ttl() {
		let pkt = fake_reply(7, 0x8180, &[
			(1, 300, &[93, 184, 216, 34]),
			(28, 60, &[0; 16]),
			(1, 120, &[93, 184, 216, 35]),
		]);

		let parsed = parse_reply(&pkt, Type::A).unwrap();
		assert_eq!(parsed.id, 7);

		match parsed.reply.unwrap() {
			Reply::A { addresses, ttl } => {
				assert_eq!(addresses, vec![Ipv4Addr::new(93, 184, 216, 34), Ipv4Addr::new(93, 184, 216, 35)]);
				assert_eq!(ttl, 120);
			}
			other => panic!("expected an A reply, got {other:?}"),
		}
	}

	#[test]
	fn cname_only_answers_leave_no_reply() {
		let mut rdata = Vec::new();
		name_to_labels(&mut rdata, "alias.example.com", None).unwrap();

		let pkt = fake_reply(7, 0x8180, &[(5, 300, &rdata)]);
		assert!(parse_reply(&pkt, Type::A).unwrap().reply.is_none());
	}

	#[test]
	fn ptr_takes_the_first_hostname() {
		let mut rdata = Vec::new();
		name_to_labels(&mut rdata, "host.example", None).unwrap();

		let mut other = Vec::new();
		name_to_labels(&mut other, "second.example", None).unwrap();

		let pkt = fake_reply(9, 0x8180, &[(12, 600, &rdata), (12, 60, &other)]);

		match parse_reply(&pkt, Type::Ptr).unwrap().reply.unwrap() {
			Reply::Ptr { hostname, ttl } => {
				assert_eq!(hostname, "host.example");
				assert_eq!(ttl, 600);
			}
			other => panic!("expected a PTR reply, got {other:?}"),
		}
	}

	#[test]
	fn error_rcode_skips_the_answer_scan() {
		// NXDOMAIN, with answer bytes that would not even parse.
		let mut pkt = fake_reply(9, 0x8183, &[]);
		pkt[6] = 0xff;

		let parsed = parse_reply(&pkt, Type::A).unwrap();
		assert!(parsed.reply.is_none());
		assert!(matches!(parsed.flags.rcode(), Rcode::NameErr));
	}

	#[test]
	fn queries_parse_back() {
		let pkt = build_query(42, "x.y.example", Type::Ptr).unwrap();
		let parsed = parse_query(&pkt).unwrap();

		assert_eq!(parsed.id, 42);
		assert!(!parsed.flags.qr());
		assert_eq!(parsed.questions, vec![Question { name: "x.y.example".into(), ty: Type::Ptr as u16, class: CLASS_IN }]);
	}

	fn a_record(name: &str, addr: [u8; 4]) -> Record {
		Record {
			name: name.into(),
			ty: Type::A,
			class: CLASS_IN,
			ttl: 300,
			payload: Payload::Raw(addr.to_vec()),
		}
	}

	#[test]
	fn response_reuses_the_question_name() {
		let questions = vec![Question { name: "example.com".into(), ty: 1, class: CLASS_IN }];
		let answers = vec![a_record("example.com", [93, 184, 216, 34])];

		let pkt = build_response(3, 0x0100, 0, false, &questions, [&answers, &[], &[]], 1500).unwrap();

		// Header and question, then the answer name as a pointer to
		// offset 12.
		let answer_at = HEADER_LEN + 13 + 4;
		assert_eq!(&pkt[answer_at..answer_at + 2], &[0xc0, 12]);

		let parsed = parse_reply(&pkt, Type::A).unwrap();
		assert_eq!(parsed.id, 3);

		match parsed.reply.unwrap() {
			Reply::A { addresses, ttl } => {
				assert_eq!(addresses, vec![Ipv4Addr::new(93, 184, 216, 34)]);
				assert_eq!(ttl, 300);
			}
			other => panic!("expected an A reply, got {other:?}"),
		}
	}

	#[test]
	fn ptr_payloads_get_a_patched_rdlength() {
		let questions = vec![Question { name: "1.0.0.10.in-addr.arpa".into(), ty: 12, class: CLASS_IN }];
		let answers = vec![Record {
			name: "1.0.0.10.in-addr.arpa".into(),
			ty: Type::Ptr,
			class: CLASS_IN,
			ttl: 60,
			payload: Payload::Name("host.example".into()),
		}];

		let pkt = build_response(4, 0x0100, 0, true, &questions, [&answers, &[], &[]], 1500).unwrap();
		let parsed = parse_reply(&pkt, Type::Ptr).unwrap();

		assert!(parsed.flags.aa());

		match parsed.reply.unwrap() {
			Reply::Ptr { hostname, .. } => assert_eq!(hostname, "host.example"),
			other => panic!("expected a PTR reply, got {other:?}"),
		}
	}

	#[test]
	fn overflow_truncates_whole_records() {
		let questions = vec![Question { name: "example.com".into(), ty: 1, class: CLASS_IN }];
		let answers = vec![a_record("example.com", [1, 1, 1, 1]), a_record("example.com", [2, 2, 2, 2])];

		// Room for the question and exactly one pointer-named record.
		let max = HEADER_LEN + 17 + 16;
		let pkt = build_response(5, 0x0100, 0, false, &questions, [&answers, &[], &[]], max).unwrap();

		let flags = Flags::from(u16::from_be_bytes([pkt[2], pkt[3]]));
		assert!(flags.tc());
		assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), 1);
		assert!(pkt.len() <= max);
	}
}
