// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UART0 (PL011) and the DTR/RTS pins.
//!
//! The FIFOs are off, so the receive interrupt fires once per byte and the
//! transmit interrupt once per byte sent. The rings in between are what
//! buffer.

use core::cell::RefCell;

use cortex_m::interrupt::Mutex;
use rp2040_pac::{RESETS, UART0};

use rp2040_ftdi::ftdi::BaudSetting;
use rp2040_ftdi::ring::{Consumer, Producer, UART_RING_SIZE};
use rp2040_ftdi::uart::{ModemLines, UartPort};

use super::clocks::PERI_CLOCK_HZ;
use super::{set_function, write_pin, Function, DTR_PIN, RTS_PIN, UART_RX_PIN, UART_TX_PIN};

type Regs = rp2040_pac::uart0::RegisterBlock;

/// UARTLCR_H: 8 data bits, no parity, one stop bit, FIFOs off.
const LCR_H_8N1: u32 = 0b11 << 5;
/// UARTCR: UARTEN, TXE, RXE.
const CR_ENABLE: u32 = 1 << 0 | 1 << 8 | 1 << 9;
/// UARTIMSC/UARTMIS/UARTICR bits.
const INT_RX: u32 = 1 << 4;
const INT_TX: u32 = 1 << 5;
const INT_RX_TIMEOUT: u32 = 1 << 6;
/// UARTFR bits.
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

fn regs() -> &'static Regs {
    unsafe { &*UART0::ptr() }
}

/// Brings UART0 out of reset at the default baud rate with only the receive
/// interrupt enabled, and routes it to its pins.
pub fn init(resets: &RESETS, uart: UART0) {
    drop(uart);
    resets.reset.modify(|_, w| w.uart0().clear_bit());
    while !resets.reset_done.read().uart0().bit() {}

    let r = regs();
    set_divisors(r, BaudSetting::DEFAULT.baud_rate());
    r.uartlcr_h.write(|w| unsafe { w.bits(LCR_H_8N1) });
    r.uartcr.write(|w| unsafe { w.bits(CR_ENABLE) });
    r.uartimsc.write(|w| unsafe { w.bits(INT_RX | INT_RX_TIMEOUT) });

    set_function(UART_TX_PIN, Function::Uart);
    set_function(UART_RX_PIN, Function::Uart);
}

/// IBRD/FBRD for `baud` off clk_peri. The divisor is kept in 1/128ths so the
/// 6-bit fraction can be rounded.
fn set_divisors(r: &Regs, baud: u32) {
    let div = 8 * PERI_CLOCK_HZ / baud.max(1);
    let (ibrd, fbrd) = match div >> 7 {
        0 => (1, 0),
        i if i >= 0xffff => (0xffff, 0),
        i => (i, ((div & 0x7f) + 1) / 2),
    };
    r.uartibrd.write(|w| unsafe { w.bits(ibrd) });
    r.uartfbrd.write(|w| unsafe { w.bits(fbrd) });
    // The divisors latch on an LCR_H write.
    r.uartlcr_h.write(|w| unsafe { w.bits(LCR_H_8N1) });
}

/// Interrupt-side state: the ring ends the UART interrupt owns.
pub struct UartIrq {
    rx: Producer<'static, UART_RING_SIZE>,
    tx: Consumer<'static, UART_RING_SIZE>,
}

static UART_IRQ: Mutex<RefCell<Option<UartIrq>>> = Mutex::new(RefCell::new(None));

/// Hands the interrupt its ring ends. Call before unmasking UART0_IRQ.
pub fn install(rx: Producer<'static, UART_RING_SIZE>, tx: Consumer<'static, UART_RING_SIZE>) {
    cortex_m::interrupt::free(|cs| {
        UART_IRQ.borrow(cs).replace(Some(UartIrq { rx, tx }));
    });
}

/// UART0_IRQ body.
pub fn service_irq() {
    cortex_m::interrupt::free(|cs| {
        if let Some(irq) = UART_IRQ.borrow(cs).borrow_mut().as_mut() {
            irq.service();
        }
    });
}

impl UartIrq {
    fn service(&mut self) {
        let r = regs();
        let mis = r.uartmis.read().bits();

        if mis & (INT_RX | INT_RX_TIMEOUT) != 0 {
            while r.uartfr.read().bits() & FR_RXFE == 0 {
                // A full ring drops the newest byte.
                let _ = self.rx.push(r.uartdr.read().bits() as u8);
            }
            r.uarticr.write(|w| unsafe { w.bits(INT_RX | INT_RX_TIMEOUT) });
        }

        if mis & INT_TX != 0 {
            self.send_next(r);
        }
    }

    /// Sends one byte from the TX ring, or stops the transmit interrupt if
    /// there's nothing left.
    fn send_next(&mut self, r: &Regs) {
        match self.tx.pop() {
            Some(b) => r.uartdr.write(|w| unsafe { w.bits(u32::from(b)) }),
            None => {
                r.uartimsc.modify(|v, w| unsafe { w.bits(v.bits() & !INT_TX) });
                r.uarticr.write(|w| unsafe { w.bits(INT_TX) });
            }
        }
    }

    /// Starts transmission if the transmit interrupt isn't already running.
    fn kick(&mut self) {
        let r = regs();
        if r.uartimsc.read().bits() & INT_TX != 0 {
            return;
        }
        if r.uartfr.read().bits() & FR_TXFF == 0 {
            if let Some(b) = self.tx.pop() {
                r.uartdr.write(|w| unsafe { w.bits(u32::from(b)) });
            }
        }
        r.uartimsc.modify(|v, w| unsafe { w.bits(v.bits() | INT_TX) });
    }
}

/// Main-loop handle on UART0.
pub struct HwUart;

impl UartPort for HwUart {
    fn kick_tx(&mut self) {
        cortex_m::interrupt::free(|cs| {
            if let Some(irq) = UART_IRQ.borrow(cs).borrow_mut().as_mut() {
                irq.kick();
            }
        });
    }

    fn clear_tx(&mut self) {
        cortex_m::interrupt::free(|cs| {
            if let Some(irq) = UART_IRQ.borrow(cs).borrow_mut().as_mut() {
                irq.tx.clear();
            }
        });
    }

    fn set_baud(&mut self, setting: BaudSetting) {
        let baud = setting.baud_rate();
        log::debug!("uart divisors for {} baud", baud);
        set_divisors(regs(), baud);
    }
}

/// DTR and RTS as plain GPIO outputs.
pub struct HwModemLines;

impl ModemLines for HwModemLines {
    fn set_dtr(&mut self, high: bool) {
        write_pin(DTR_PIN, high);
    }

    fn set_rts(&mut self, high: bool) {
        write_pin(RTS_PIN, high);
    }
}
