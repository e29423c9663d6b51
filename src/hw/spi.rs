// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPI0 as the JTAG byte engine.
//!
//! TCK, TDI and TDO sit on SPI0's SCK, TX and RX pins, so byte transfers hand
//! them to the PL022 by switching the pin function, and bit-level work takes
//! them back to SIO.

use rp2040_pac::{RESETS, SPI0};

use rp2040_ftdi::jtag::{BitOrder, JtagPins, SpiTransceiver};

use super::{set_function, write_pin, Function, TCK_PIN, TDI_PIN, TDO_PIN};

type SpiRegs = rp2040_pac::spi0::RegisterBlock;

/// SSPCR0: 8-bit frames, Motorola format, mode 0, SCR in bits 15:8.
const CR0_8BIT: u32 = 7;
const SPI_SCR: u32 = 10;
/// SSPCPSR: even prescaler; 132 MHz / (2 * 11) = 6 MHz.
const SPI_CPSR: u32 = 2;
/// SSPCR1: SSE.
const CR1_ENABLE: u32 = 1 << 1;
/// SSPSR bits.
const SR_TNF: u32 = 1 << 1;
const SR_RNE: u32 = 1 << 2;

/// PL022 SPI0 as the byte engine.
pub struct Pl022 {
    regs: &'static SpiRegs,
    enabled: bool,
}

impl Pl022 {
    pub fn init(resets: &RESETS, spi: SPI0) -> Self {
        drop(spi);
        resets.reset.modify(|_, w| w.spi0().clear_bit());
        while !resets.reset_done.read().spi0().bit() {}

        let regs = unsafe { &*SPI0::ptr() };
        regs.sspcpsr.write(|w| unsafe { w.bits(SPI_CPSR) });
        regs.sspcr0
            .write(|w| unsafe { w.bits(CR0_8BIT | SPI_SCR << 8) });
        regs.sspcr1.write(|w| unsafe { w.bits(CR1_ENABLE) });
        Self {
            regs,
            enabled: false,
        }
    }
}

impl SpiTransceiver for Pl022 {
    fn enable(&mut self) {
        if !self.enabled {
            for pin in [TCK_PIN, TDI_PIN, TDO_PIN] {
                set_function(pin, Function::Spi);
            }
            self.enabled = true;
        }
    }

    fn disable(&mut self) {
        if self.enabled {
            // Park TCK low before SIO takes it back.
            write_pin(TCK_PIN, false);
            for pin in [TCK_PIN, TDI_PIN, TDO_PIN] {
                set_function(pin, Function::Sio);
            }
            self.enabled = false;
        }
    }

    fn transfer<P: JtagPins>(&mut self, _pins: &mut P, order: BitOrder, byte: u8) -> u8 {
        // The PL022 only shifts MSB first.
        let out = match order {
            BitOrder::Msb => byte,
            BitOrder::Lsb => byte.reverse_bits(),
        };
        while self.regs.sspsr.read().bits() & SR_TNF == 0 {}
        self.regs.sspdr.write(|w| unsafe { w.bits(u32::from(out)) });
        while self.regs.sspsr.read().bits() & SR_RNE == 0 {}
        let rcv = self.regs.sspdr.read().bits() as u8;
        match order {
            BitOrder::Msb => rcv,
            BitOrder::Lsb => rcv.reverse_bits(),
        }
    }
}
