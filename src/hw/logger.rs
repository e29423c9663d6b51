// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `log` backend that prints over RTT, for a debug probe to pick up.

use log::{LevelFilter, Log, Metadata, Record};
use rtt_target::{rprintln, rtt_init_print};

struct RttLogger;

impl Log for RttLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            rprintln!("{:<5} {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: RttLogger = RttLogger;

/// Sets up the RTT channel and installs the logger. Call once, before
/// interrupts are enabled.
pub fn init(level: LevelFilter) {
    rtt_init_print!();
    // Safety: single-threaded at this point; nothing else is logging yet.
    unsafe {
        // Fails only if a logger is already installed.
        let _ = log::set_logger_racy(&LOGGER);
        log::set_max_level_racy(level);
    }
}
