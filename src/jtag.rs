// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The JTAG side of the adapter, as three small capabilities.
//!
//! - `JtagPins`: the four JTAG signals as plain GPIO.
//! - `SpiTransceiver`: something that can clock a whole byte out on TDI and
//!   in from TDO. On the RP2040 that's the PL022 SPI block; `BitBangSpi` does
//!   the same thing with `JtagPins` for boards (or builds) without it.
//! - `TestClock`: a free-running clock on TCK, for the run-test quirk.
//!
//! All the clocking follows SPI mode 0, which is what JTAG wants: TDI/TMS are
//! set up while TCK is low, TDO is sampled just after the rising edge, and
//! TCK is left low afterwards.

/// Order in which the bits of a byte go over the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitOrder {
    Lsb,
    Msb,
}

pub trait JtagPins {
    fn set_tck(&mut self, high: bool);
    fn set_tdi(&mut self, high: bool);
    fn set_tms(&mut self, high: bool);
    fn tdo(&mut self) -> bool;
}

pub trait SpiTransceiver {
    /// Hands TCK/TDI/TDO to the byte engine.
    fn enable(&mut self);
    /// Gives the pins back to GPIO, for bit-level work.
    fn disable(&mut self);
    /// Clocks one byte out and returns the byte clocked in, both in `order`.
    /// May busy-wait on the hardware for at most one byte time.
    fn transfer<P: JtagPins>(&mut self, pins: &mut P, order: BitOrder, byte: u8) -> u8;
}

pub trait TestClock {
    fn start(&mut self);
    fn stop(&mut self);
}

/// Software `SpiTransceiver` that toggles `JtagPins` directly.
#[derive(Copy, Clone, Debug, Default)]
pub struct BitBangSpi;

impl SpiTransceiver for BitBangSpi {
    fn enable(&mut self) {}

    fn disable(&mut self) {}

    fn transfer<P: JtagPins>(&mut self, pins: &mut P, order: BitOrder, byte: u8) -> u8 {
        clock_bits(pins, order, byte, 8)
    }
}

/// Shifts `count` bits of `data` out on TDI, returning what came back on TDO.
///
/// For LSB-first, bits come in at the top of the result and move down, so a
/// short read ends up in the high bits, as FTDI parts do it. For MSB-first
/// they come in at the bottom.
fn clock_bits<P: JtagPins>(pins: &mut P, order: BitOrder, mut data: u8, count: u8) -> u8 {
    let mut rcv = 0u8;
    for _ in 0..count {
        pins.set_tck(false);
        match order {
            BitOrder::Lsb => {
                pins.set_tdi(data & 0x01 != 0);
                data >>= 1;
                rcv >>= 1;
                pins.set_tck(true);
                if pins.tdo() {
                    rcv |= 0x80;
                }
            }
            BitOrder::Msb => {
                pins.set_tdi(data & 0x80 != 0);
                data <<= 1;
                rcv <<= 1;
                pins.set_tck(true);
                if pins.tdo() {
                    rcv |= 0x01;
                }
            }
        }
    }
    pins.set_tck(false);
    rcv
}

/// Everything the MPSSE interpreter drives.
pub struct JtagPort<P, S, C> {
    pub pins: P,
    pub spi: S,
    pub clock: C,
}

impl<P: JtagPins, S: SpiTransceiver, C: TestClock> JtagPort<P, S, C> {
    pub fn new(pins: P, spi: S, clock: C) -> Self {
        Self { pins, spi, clock }
    }

    pub fn spi_on(&mut self) {
        self.spi.enable();
    }

    pub fn spi_off(&mut self) {
        self.spi.disable();
    }

    pub fn shift_byte(&mut self, order: BitOrder, byte: u8) -> u8 {
        self.spi.transfer(&mut self.pins, order, byte)
    }

    /// Clocks `count` (1..=8) bits of `data` on TDI.
    pub fn shift_bits(&mut self, order: BitOrder, data: u8, count: u8) -> u8 {
        clock_bits(&mut self.pins, order, data, count)
    }

    /// Clocks `count` (1..=7) bits of `data` on TMS, LSB first, while holding
    /// TDI at bit 7 of `data`. TDO is captured the same way as an LSB-first
    /// `shift_bits`.
    pub fn shift_tms(&mut self, data: u8, count: u8) -> u8 {
        let pins = &mut self.pins;
        pins.set_tdi(data & 0x80 != 0);
        let mut data = data;
        let mut rcv = 0u8;
        for _ in 0..count {
            pins.set_tck(false);
            pins.set_tms(data & 0x01 != 0);
            data >>= 1;
            rcv >>= 1;
            pins.set_tck(true);
            if pins.tdo() {
                rcv |= 0x80;
            }
        }
        pins.set_tck(false);
        rcv
    }

    pub fn start_test_clock(&mut self) {
        self.clock.start();
    }

    pub fn stop_test_clock(&mut self) {
        self.clock.stop();
    }
}
