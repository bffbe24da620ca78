//! Minimal stderr logger.
//!
//! Install with [`Logger::init`], then pick a level with
//! `log::set_max_level`. The monitors adjust the max level themselves for
//! the duration of a session.

use log::{Metadata, Record};

pub struct Logger;

static LOGGER: Logger = Logger;

impl Logger {
    pub fn init() -> Result<(), log::SetLoggerError> {
        log::set_logger(&LOGGER)
    }
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}
