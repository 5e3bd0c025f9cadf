use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use stakker::Stakker;
use utils::error::Result;

use crate::GLOBAL;

static EXIT: AtomicBool = AtomicBool::new(false);

/// Creates a `Stakker` instance anchored to the current monotonic and
/// system clocks.
pub fn init() -> Stakker {
	let mut s = Stakker::new(Instant::now());
	s.set_systime(Some(SystemTime::now()));
	s
}

/// Runs the reactor until there is no work left: no registered sockets and
/// no pending timers. Ctrl-C requests an exit; `exit_fn` then gets a chance
/// to defer cleanup before the queues drain one last time.
pub fn exec(stakker: &mut Stakker, exit_fn: impl FnOnce()) -> Result {
	ctrlc::set_handler(|| EXIT.store(true, Ordering::Relaxed)).map_err(|err| log::error!("Failed to set the Ctrl+C handler: {err}"))?;

	GLOBAL.with(|this| {
		let mut t = Instant::now();
		let mut idle_pending = stakker.run(t, false);

		while stakker.not_shutdown() {
			if EXIT.load(Ordering::Relaxed) {
				exit_fn();
				stakker.run(t, false);
				break;
			}

			let timeout = if idle_pending {
				// Items are queued on the idle queue; poll without blocking.
				Some(Duration::ZERO)
			} else {
				stakker.next_wait(t)
			};

			if timeout.is_none() && !this.borrow().is_io() {
				break;
			}

			log::trace!("idle_pending: {}, timeout: {:?}", idle_pending, timeout);

			let Ok(is_io) = this.borrow_mut().poll(timeout) else {
				EXIT.store(true, Ordering::Relaxed);
				continue;
			};

			t = Instant::now();
			idle_pending = stakker.run(t, idle_pending && !is_io);
		}

		Ok(())
	})
}
