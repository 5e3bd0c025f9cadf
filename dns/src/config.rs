//! resolv.conf-style configuration: `nameserver`, `domain`, `search` and
//! `options` directives, gated by option groups.

use core::time::Duration;
use std::net::Ipv4Addr;
use std::path::Path;

use log::warn;
use stakker::CX;

use crate::{Resolver, DNS_PORT};

/// Directive groups; the `flags` argument of the parse calls selects which
/// ones take effect.
pub const DNS_OPTION_SEARCH: u32 = 1;
pub const DNS_OPTION_NAMESERVERS: u32 = 2;
pub const DNS_OPTION_MISC: u32 = 4;
pub const DNS_OPTIONS_ALL: u32 = 7;

/// Size cap on the configuration file.
const MAX_FILE: u64 = 65535;

/// Configuration-parse failures. The numeric values are a published
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParseError {
	/// The file could not be opened.
	Open = 1,
	/// The file could not be inspected.
	Stat = 2,
	/// The file exceeds 65535 bytes.
	TooLarge = 3,
	/// Out of memory.
	OutOfMemory = 4,
	/// The file shrank while being read.
	ShortRead = 5,
}

/// The recognised directives of one file. Parsing is decoupled from the
/// resolver so it stays pure.
#[derive(Debug, Default, PartialEq, Eq)]
struct ResolvConf {
	nameservers: Vec<Ipv4Addr>,
	search: Option<Vec<String>>,
	ndots: Option<usize>,
	timeout: Option<u64>,
	attempts: Option<u8>,
}

fn parse(contents: &str) -> ResolvConf {
	let mut conf = ResolvConf::default();

	for line in contents.lines() {
		let line = line.split(|c| matches!(c, '#' | ';')).next().unwrap_or("");
		let mut words = line.split_ascii_whitespace();

		match words.next() {
			Some("nameserver") => match words.next().map(str::parse) {
				Some(Ok(address)) => conf.nameservers.push(address),
				_ => warn!("Ignoring an unparsable nameserver line"),
			},
			Some("domain") => {
				if let Some(domain) = words.next() {
					conf.search = Some(vec![domain.to_owned()]);
				}
			}
			Some("search") => {
				conf.search = Some(words.map(str::to_owned).collect());
			}
			Some("options") => {
				for option in words {
					parse_option(&mut conf, option);
				}
			}
			// Every other directive is somebody else's business.
			_ => {}
		}
	}

	conf
}

fn parse_option(conf: &mut ResolvConf, option: &str) {
	let Some((key, value)) = option.split_once(':') else { return };

	match (key, value.parse::<u64>()) {
		("ndots", Ok(n)) => conf.ndots = Some(n as usize),
		("timeout", Ok(n)) => conf.timeout = Some(n),
		("attempts", Ok(n)) => conf.attempts = Some(n.min(255) as u8),
		_ => warn!("Ignoring option {option:?}"),
	}
}

fn read_capped(path: &Path) -> Result<String, ParseError> {
	use std::io::Read;

	let mut file = std::fs::File::open(path).map_err(|_| ParseError::Open)?;
	let meta = file.metadata().map_err(|_| ParseError::Stat)?;

	if meta.len() > MAX_FILE {
		return Err(ParseError::TooLarge);
	}

	let mut contents = String::with_capacity(meta.len() as usize);
	let n = file.read_to_string(&mut contents).map_err(|_| ParseError::ShortRead)?;

	if n as u64 != meta.len() {
		return Err(ParseError::ShortRead);
	}

	Ok(contents)
}

impl Resolver {
	/// Reads and applies a configuration file. On failure the defaults
	/// selected by `flags` still apply before the error is reported.
	pub(crate) fn apply_resolv_conf(&mut self, cx: CX![], flags: u32, path: &Path) -> Result<(), ParseError> {
		match read_capped(path) {
			Ok(contents) => {
				self.apply(cx, flags, &parse(&contents));
				Ok(())
			}
			Err(err) => {
				warn!("Could not read {}: {err:?}", path.display());
				self.apply(cx, flags, &ResolvConf::default());
				Err(err)
			}
		}
	}

	fn apply(&mut self, cx: CX![], flags: u32, conf: &ResolvConf) {
		if flags & DNS_OPTION_SEARCH != 0 {
			if let Some(domains) = &conf.search {
				self.edit_search(|s| s.domains = domains.clone());
			}

			if let Some(ndots) = conf.ndots {
				self.edit_search(|s| s.ndots = ndots);
			}
		}

		if flags & DNS_OPTION_MISC != 0 {
			if let Some(timeout) = conf.timeout {
				self.opts.timeout = Duration::from_secs(timeout);
			}

			if let Some(attempts) = conf.attempts {
				self.opts.max_retransmits = attempts;
			}
		}

		if flags & DNS_OPTION_NAMESERVERS != 0 {
			for &address in &conf.nameservers {
				let _ = self.add_server(cx, (address, DNS_PORT).into());
			}

			if self.pool.len() == 0 {
				// Nothing configured anywhere: fall back to localhost.
				let _ = self.add_server(cx, (Ipv4Addr::LOCALHOST, DNS_PORT).into());
			}
		}

		if flags & DNS_OPTION_SEARCH != 0 && self.search.as_ref().map_or(true, |s| s.domains.is_empty()) {
			// Derive a search domain from the host's own name.
			if let Some(domain) = hostname_domain() {
				self.edit_search(move |s| s.domains = vec![domain]);
			}
		}
	}
}

/// The portion of the local hostname after the first dot, if any.
#[cfg(unix)]
fn hostname_domain() -> Option<String> {
	let mut buf = [0u8; 256];

	let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };

	if rc != 0 {
		return None;
	}

	let len = buf.iter().position(|&b| b == 0)?;
	let host = core::str::from_utf8(&buf[..len]).ok()?;

	host.split_once('.').map(|(_, domain)| domain.to_owned()).filter(|d| !d.is_empty())
}

#[cfg(not(unix))]
fn hostname_domain() -> Option<String> {
	None
}
