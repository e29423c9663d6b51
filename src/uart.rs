// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UART channel glue: soft DTR/RTS and the hardware seam.
//!
//! The data path itself is two `ring::RingBuffer`s. The receive interrupt
//! pushes into one and the transmit interrupt pops from the other, one byte
//! per interrupt; the main loop owns the opposite ends.
//!
//! DTR and RTS are usually wired to the reset and boot-mode pins of a target
//! microcontroller. Terminal programs and flashing tools toggle them in quick
//! bursts, so rather than follow every request we wait for the host to go
//! quiet for `MODEM_DEBOUNCE_TICKS` and then apply the final state.

use core::sync::atomic::Ordering;

use crate::ftdi::{BaudSetting, ModemControl};
use crate::state::UsbConfig;

/// Quiet period before soft DTR/RTS reach the pins, in ticks.
pub const MODEM_DEBOUNCE_TICKS: u8 = 20;

/// The physical modem control outputs.
pub trait ModemLines {
    fn set_dtr(&mut self, high: bool);
    fn set_rts(&mut self, high: bool);
}

/// Main-loop access to the UART hardware.
pub trait UartPort {
    /// Makes sure the transmit interrupt is draining the TX ring. Called
    /// after bytes were added; must be harmless if it already is.
    fn kick_tx(&mut self);
    /// Drops whatever is still queued for the target. The ring's consumer
    /// belongs to the transmit side, so the clear happens there.
    fn clear_tx(&mut self);
    fn set_baud(&mut self, setting: BaudSetting);
}

/// Records a SET_MODEM_CTRL request and restarts the debounce window. USB
/// interrupt only.
pub fn request_modem_lines(config: &UsbConfig, ctl: ModemControl) {
    if let Some(dtr) = ctl.dtr {
        config.soft_dtr.store(dtr, Ordering::Relaxed);
    }
    if let Some(rts) = ctl.rts {
        config.soft_rts.store(rts, Ordering::Relaxed);
    }
    config
        .modem_countdown
        .store(MODEM_DEBOUNCE_TICKS, Ordering::Relaxed);
}

/// Advances the debounce window by one tick, driving the lines when it
/// closes. Tick interrupt only.
pub fn flow_control_tick<L: ModemLines>(config: &UsbConfig, lines: &mut L) {
    let count = config.modem_countdown.load(Ordering::Relaxed);
    if count == 0 {
        return;
    }
    let count = count - 1;
    config.modem_countdown.store(count, Ordering::Relaxed);
    if count != 1 {
        return;
    }

    let dtr = config.soft_dtr.load(Ordering::Relaxed);
    let rts = config.soft_rts.load(Ordering::Relaxed);
    if dtr == rts {
        // The usual auto-reset circuit (two cross-coupled transistors)
        // ignores both lines moving together. Pulse RTS so the target still
        // sees an edge and comes out in a known state.
        lines.set_dtr(true);
        lines.set_rts(false);
        lines.set_rts(true);
    } else {
        lines.set_rts(rts);
        lines.set_dtr(dtr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLines;

    fn run(config: &UsbConfig, lines: &mut MockLines, ticks: usize) {
        for _ in 0..ticks {
            flow_control_tick(config, lines);
        }
    }

    #[test]
    fn test_lines_wait_for_debounce() {
        let config = UsbConfig::new();
        let mut lines = MockLines::default();
        request_modem_lines(&config, ModemControl::from_value(0x0303 & !0x0001));

        run(&config, &mut lines, usize::from(MODEM_DEBOUNCE_TICKS) - 2);
        assert!(lines.events.is_empty());

        run(&config, &mut lines, 1);
        // DTR low, RTS high.
        assert_eq!(lines.events, vec![("rts", true), ("dtr", false)]);

        run(&config, &mut lines, 50);
        assert_eq!(lines.events.len(), 2);
        assert_eq!(config.modem_countdown.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_rapid_toggles_apply_once() {
        let config = UsbConfig::new();
        let mut lines = MockLines::default();
        for i in 0..10u16 {
            request_modem_lines(&config, ModemControl::from_value(0x0100 | (i & 1)));
            run(&config, &mut lines, 5);
        }
        assert!(lines.events.is_empty());
        run(&config, &mut lines, 30);
        // Last request was DTR high; RTS untouched so still low.
        assert_eq!(lines.events, vec![("rts", false), ("dtr", true)]);
    }

    #[test]
    fn test_equal_levels_pulse_rts() {
        let config = UsbConfig::new();
        let mut lines = MockLines::default();
        request_modem_lines(&config, ModemControl::from_value(0x0303));
        run(&config, &mut lines, 25);
        assert_eq!(
            lines.events,
            vec![("dtr", true), ("rts", false), ("rts", true)]
        );
    }
}
