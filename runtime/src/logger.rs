use std::time::SystemTime;

use log::{Level, LevelFilter};
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

/// Colored stderr sink for the `log` facade.
pub struct Logger;

static LOGGER: Logger = Logger;

/// Installs the sink. Safe to call more than once; later calls keep the
/// first registration and only adjust the level.
pub fn init(level: LevelFilter) {
	let _ = log::set_logger(&LOGGER);
	log::set_max_level(level);
}

impl log::Log for Logger {
	fn enabled(&self, metadata: &log::Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &log::Record) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let time = humantime::format_rfc3339_seconds(SystemTime::now());

		let color = match record.level() {
			Level::Trace => Color::Purple,
			Level::Debug => Color::Blue,
			Level::Info => Color::Green,
			Level::Warn => Color::Yellow,
			Level::Error => Color::Red,
		};

		let dim = Style::new().dimmed().prefix();
		let bold = Style::new().bold().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {bold}{}{RESET}{dim}:{RESET} {}",
			color.bold().prefix(),
			record.level(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}
