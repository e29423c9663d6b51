// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RP2040 side of the adapter: register-level implementations of the traits
//! the protocol core is written against.
//!
//! Nothing in here uses a HAL. Where the PAC's field accessors are awkward,
//! or the field isn't modelled, registers are written with raw bits and the
//! datasheet bit position is named in a constant.

pub mod clocks;
pub mod jtag;
pub mod logger;
pub mod rom;
#[cfg(feature = "hw-spi")]
pub mod spi;
pub mod uart;
pub mod usb;

use rp2040_pac::{IO_BANK0, RESETS, SIO};

cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        pub const LED_PIN: u8 = 25;
        pub const UART_TX_PIN: u8 = 0;
        pub const UART_RX_PIN: u8 = 1;
        pub const DTR_PIN: u8 = 2;
        pub const RTS_PIN: u8 = 3;
        pub const TDO_PIN: u8 = 16;
        pub const TMS_PIN: u8 = 17;
        pub const TCK_PIN: u8 = 18;
        pub const TDI_PIN: u8 = 19;
    } else if #[cfg(feature = "target-feather")] {
        pub const LED_PIN: u8 = 13;
        pub const UART_TX_PIN: u8 = 0;
        pub const UART_RX_PIN: u8 = 1;
        pub const DTR_PIN: u8 = 7;
        pub const RTS_PIN: u8 = 8;
        pub const TDO_PIN: u8 = 20;
        pub const TMS_PIN: u8 = 6;
        pub const TCK_PIN: u8 = 18;
        pub const TDI_PIN: u8 = 19;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

/// GPIO function select values (datasheet 2.19.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Function {
    Spi = 1,
    Uart = 2,
    Pwm = 4,
    Sio = 5,
}

pub fn sio() -> &'static rp2040_pac::sio::RegisterBlock {
    unsafe { &*SIO::ptr() }
}

pub fn io_bank0() -> &'static rp2040_pac::io_bank0::RegisterBlock {
    unsafe { &*IO_BANK0::ptr() }
}

pub fn set_function(pin: u8, function: Function) {
    io_bank0().gpio[pin as usize]
        .gpio_ctrl
        .write(|w| unsafe { w.funcsel().bits(function as u8) });
}

/// Hands `pin` to SIO as an output, starting at `level`.
pub fn make_output(pin: u8, level: bool) {
    write_pin(pin, level);
    set_function(pin, Function::Sio);
    sio().gpio_oe_set.write(|w| unsafe { w.bits(1 << pin) });
}

pub fn make_input(pin: u8) {
    sio().gpio_oe_clr.write(|w| unsafe { w.bits(1 << pin) });
    set_function(pin, Function::Sio);
}

#[inline(always)]
pub fn raise_pin(pin: u8) {
    sio().gpio_out_set.write(|w| unsafe { w.bits(1 << pin) });
}

#[inline(always)]
pub fn lower_pin(pin: u8) {
    sio().gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
}

#[inline(always)]
pub fn write_pin(pin: u8, high: bool) {
    if high {
        raise_pin(pin);
    } else {
        lower_pin(pin);
    }
}

#[inline(always)]
pub fn read_pin(pin: u8) -> bool {
    sio().gpio_in.read().bits() & (1 << pin) != 0
}

/// Takes the GPIO banks out of reset and parks the board's pins in their
/// idle states. Peripheral blocks are brought up by their own modules.
pub fn init_pins(resets: &RESETS) {
    resets
        .reset
        .modify(|_, w| w.io_bank0().clear_bit().pads_bank0().clear_bit());
    while !resets.reset_done.read().io_bank0().bit() {}
    while !resets.reset_done.read().pads_bank0().bit() {}

    make_output(LED_PIN, false);
    // Modem lines idle high, as on an FTDI part with nothing asserted.
    make_output(DTR_PIN, true);
    make_output(RTS_PIN, true);

    make_output(TCK_PIN, false);
    make_output(TDI_PIN, false);
    make_output(TMS_PIN, true);
    make_input(TDO_PIN);
}
