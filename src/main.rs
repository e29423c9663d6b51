// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware for an RP2040 board posing as a dual-channel FTDI adapter:
//! channel A is an MPSSE JTAG engine, channel B a UART.
//!
//! Three interrupts and a main loop, all at one priority level:
//!
//! - USBCTRL_IRQ runs the control endpoint and flags bulk completions.
//! - SysTick counts milliseconds and debounces DTR/RTS.
//! - UART0_IRQ moves bytes between the UART and the two rings.
//! - The main loop moves packet contents: MPSSE in and out, UART bytes in
//!   and out, latency timer flushes.
//!
//! The protocol logic lives in the library; this file wires it to the
//! hardware in `hw`.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::sync::atomic::Ordering;

    use cortex_m::peripheral::NVIC;
    use cortex_m_rt::{entry, exception};
    use log::LevelFilter;
    use rp2040_pac::{interrupt, Interrupt};

    use panic_halt as _;

    use rp2040_ftdi::bridge::Bridge;
    use rp2040_ftdi::control::ControlDispatcher;
    use rp2040_ftdi::descriptors::SerialNumber;
    use rp2040_ftdi::jtag::JtagPort;
    use rp2040_ftdi::mpsse::Mpsse;
    use rp2040_ftdi::ring::{RingBuffer, UART_RING_SIZE};
    use rp2040_ftdi::state::Shared;
    use rp2040_ftdi::uart::flow_control_tick;

    use crate::hw;
    use crate::hw::jtag::{GpioJtag, PwmTestClock};
    use crate::hw::uart::{HwModemLines, HwUart};
    use crate::hw::usb::UsbBus;

    cfg_if::cfg_if! {
        if #[cfg(feature = "target-pico")] {
            #[link_section = ".boot_loader"]
            #[used]
            static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
        } else {
            #[link_section = ".boot_loader"]
            #[used]
            static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GD25Q64CS;
        }
    }

    static SHARED: Shared = Shared::new();

    /// Time between the host asking for the bootloader and us going there,
    /// so the control transfer that asked can finish.
    const REBOOT_DELAY_TICKS: u16 = 100;

    #[entry]
    fn main() -> ! {
        static mut UART_RX: RingBuffer<UART_RING_SIZE> = RingBuffer::new();
        static mut UART_TX: RingBuffer<UART_RING_SIZE> = RingBuffer::new();

        let p = rp2040_pac::Peripherals::take().unwrap();
        let mut cp = cortex_m::Peripherals::take().unwrap();

        hw::logger::init(LevelFilter::Info);
        hw::clocks::init(&p.RESETS, &p.XOSC, &p.ROSC, &p.CLOCKS, &p.PLL_SYS, &p.PLL_USB);
        hw::init_pins(&p.RESETS);

        let serial = match hw::rom::flash_unique_id() {
            Some(uid) => SerialNumber::new([uid[3], uid[4], uid[5], uid[6], uid[7]]),
            None => {
                log::warn!("no flash unique id, using a zero serial number");
                SerialNumber::new([0; 5])
            }
        };

        let (rx_in, rx_out) = UART_RX.split();
        let (tx_in, tx_out) = UART_TX.split();
        hw::uart::init(&p.RESETS, p.UART0);
        hw::uart::install(rx_in, tx_out);

        cfg_if::cfg_if! {
            if #[cfg(feature = "hw-spi")] {
                let spi = hw::spi::Pl022::init(&p.RESETS, p.SPI0);
            } else {
                let spi = rp2040_ftdi::jtag::BitBangSpi;
            }
        }
        let clock = PwmTestClock::init(&p.RESETS, p.PWM);
        let port = JtagPort::new(GpioJtag, spi, clock);
        let mpsse = Mpsse::new(cfg!(feature = "run-test-quirk"));
        let mut bridge = Bridge::new(&SHARED, mpsse, port, rx_out, tx_in);

        let mut bus = UsbBus::init(&p.RESETS, p.USBCTRL_REGS, p.USBCTRL_DPRAM, &SHARED);
        hw::usb::install(bus, ControlDispatcher::new(&SHARED, serial));

        hw::clocks::start_tick(&mut cp.SYST);
        unsafe {
            NVIC::unmask(Interrupt::USBCTRL_IRQ);
            NVIC::unmask(Interrupt::UART0_IRQ);
        }
        bus.connect();
        log::info!("rp2040-ftdi up, serial {:?}", serial);

        let mut uart = HwUart;
        let mut reboot_since = None;
        loop {
            bridge.poll(&mut bus, &mut uart);

            // Lit while configured, dark while an MPSSE command is in flight.
            hw::write_pin(
                hw::LED_PIN,
                SHARED.config.is_configured() && bridge.mpsse().is_idle(),
            );

            if SHARED.config.reboot_requested.load(Ordering::Relaxed) {
                let now = SHARED.now();
                let since = *reboot_since.get_or_insert(now);
                if now.wrapping_sub(since) >= REBOOT_DELAY_TICKS {
                    hw::rom::reset_to_usb_boot();
                }
            }
        }
    }

    #[exception]
    fn SysTick() {
        SHARED.tick();
        flow_control_tick(&SHARED.config, &mut HwModemLines);
    }

    #[interrupt]
    fn USBCTRL_IRQ() {
        hw::usb::service_irq();
    }

    #[interrupt]
    fn UART0_IRQ() {
        hw::uart::service_irq();
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    eprintln!("rp2040-ftdi is RP2040 firmware; build it for thumbv6m-none-eabi");
}
