//! Search-list expansion: short names are retried with configured postfix
//! domains, ordered by the ndots heuristic.

use std::rc::Rc;

/// The configured search policy. Requests hold a shared reference to the
/// state that was current when they were submitted; later configuration
/// changes clone-on-write and leave in-flight expansions untouched.
#[derive(Clone)]
pub(crate) struct SearchState {
	/// Names with at least this many dots are tried verbatim first.
	pub ndots: usize,
	/// Postfix domains, in the order they are tried.
	pub domains: Vec<String>,
}

impl Default for SearchState {
	fn default() -> Self {
		Self { ndots: 1, domains: Vec::new() }
	}
}

impl SearchState {
	/// The `idx`-th candidate for `base`, or `None` once the sequence is
	/// exhausted. Every base yields exactly `domains.len() + 1` candidates:
	/// names with `ndots` or more dots lead with the verbatim name, short
	/// names end with it.
	pub fn candidate(&self, base: &str, idx: usize) -> Option<String> {
		let k = self.domains.len();

		if idx > k {
			return None;
		}

		let dots = base.matches('.').count();

		let postfix = if dots >= self.ndots {
			match idx {
				0 => return Some(base.to_owned()),
				_ => &self.domains[idx - 1],
			}
		} else if idx == k {
			return Some(base.to_owned());
		} else {
			&self.domains[idx]
		};

		Some(format!("{base}.{postfix}"))
	}
}

/// Per-request expansion cursor.
pub(crate) struct SearchCtx {
	pub state: Rc<SearchState>,
	/// The name as originally submitted.
	pub base: String,
	/// Index of the candidate currently in flight.
	pub attempt: usize,
}

impl SearchCtx {
	pub fn new(state: Rc<SearchState>, base: String) -> Self {
		Self { state, base, attempt: 0 }
	}

	/// The candidate currently in flight.
	pub fn current(&self) -> Option<String> {
		self.state.candidate(&self.base, self.attempt)
	}

	/// Advances to the next candidate after a NOTEXIST.
	pub fn advance(&mut self) -> Option<String> {
		self.attempt += 1;
		self.current()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn state(ndots: usize, domains: &[&str]) -> SearchState {
		SearchState { ndots, domains: domains.iter().map(|&d| d.to_owned()).collect() }
	}

	fn all(state: &SearchState, base: &str) -> Vec<String> {
		(0..).map_while(|idx| state.candidate(base, idx)).collect()
	}

	#[test]
	fn short_names_try_postfixes_first() {
		let s = state(1, &["a.com", "b.com"]);
		assert_eq!(all(&s, "x"), ["x.a.com", "x.b.com", "x"]);
	}

	#[test]
	fn qualified_names_try_verbatim_first() {
		let s = state(1, &["a.com", "b.com"]);
		assert_eq!(all(&s, "x.y"), ["x.y", "x.y.a.com", "x.y.b.com"]);
	}

	#[test]
	fn every_base_yields_k_plus_one_candidates() {
		let s = state(2, &["a.com", "b.com", "c.com"]);

		for base in ["x", "x.y", "x.y.z"] {
			assert_eq!(all(&s, base).len(), 4, "base {base:?}");
		}
	}

	#[test]
	fn empty_search_list_yields_only_the_base() {
		let s = state(1, &[]);
		assert_eq!(all(&s, "x"), ["x"]);
		assert_eq!(all(&s, "x.y"), ["x.y"]);
	}

	#[test]
	fn the_cursor_walks_in_list_order() {
		let mut ctx = SearchCtx::new(Rc::new(state(1, &["a.com", "b.com"])), "host".into());

		assert_eq!(ctx.current().unwrap(), "host.a.com");
		assert_eq!(ctx.advance().unwrap(), "host.b.com");
		assert_eq!(ctx.advance().unwrap(), "host");
		assert_eq!(ctx.advance(), None);
	}
}
