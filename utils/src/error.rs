use core::result;

/// The workspace-wide result type. Failures carry no payload; the site that
/// detects a failure reports it (usually through `log`) and `Err(())` only
/// propagates the fact that something went wrong.
pub type Result<T = (), E = ()> = result::Result<T, E>;

/// Converts a `Result` into an `Option`, handing the error to a reporting
/// closure on the way.
pub trait OrReport<T, E> {
	fn ok_or(self, report: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> OrReport<T, E> for result::Result<T, E> {
	fn ok_or(self, report: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				report(e);
				None
			}
		}
	}
}

/// Runs a reporting closure when an `Option` is empty, then passes the
/// option through unchanged.
pub trait SomeOrReport<T> {
	fn some_or(self, report: impl FnOnce()) -> Option<T>;
}

impl<T> SomeOrReport<T> for Option<T> {
	fn some_or(self, report: impl FnOnce()) -> Option<T> {
		if self.is_none() {
			report();
		}

		self
	}
}

pub use OrReport as _;
