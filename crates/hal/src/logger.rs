//! Kernel logger.
//!
//! Implements `log::Log` on top of the fault console so boot and init-path
//! messages (`log::info!` and friends) share one output with exception
//! diagnostics. Exception handlers themselves never go through `log`.

use core::fmt::Write;

use ks_error::define_kernel_error;
use log::{Level, LevelFilter, Metadata, Record};

use crate::console::{CONSOLE, Color, LINE_CAPACITY, LineBuffer, Segment};

define_kernel_error! {
    pub enum LoggerError(0x02) {
        AlreadyInstalled = 0x01 => "A global logger is already installed",
    }
}

static LOGGER: ConsoleLogger = ConsoleLogger;

struct ConsoleLogger;

const fn level_tag(level: Level) -> (&'static str, Color) {
    match level {
        Level::Error => ("[ERROR]", Color::Red),
        Level::Warn => ("[WARN ]", Color::Yellow),
        Level::Info => ("[INFO ]", Color::Green),
        Level::Debug => ("[DEBUG]", Color::Cyan),
        Level::Trace => ("[TRACE]", Color::Magenta),
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let (tag, color) = level_tag(record.level());
        let mut text = LineBuffer::<LINE_CAPACITY>::new();
        let _ = write!(text, " {}", record.args());
        CONSOLE.write_line(&[
            Segment::colored(color, Color::Black, tag),
            Segment::plain(text.as_str()),
        ]);
    }

    fn flush(&self) {}
}

/// Installs the console logger.
///
/// # Arguments
/// * `max_level` - The most verbose level that will be printed.
pub fn init(max_level: LevelFilter) -> Result<(), LoggerError> {
    log::set_logger(&LOGGER).map_err(|_| LoggerError::AlreadyInstalled)?;
    log::set_max_level(max_level);
    Ok(())
}
