// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The main loop's data pump.
//!
//! `Bridge` owns everything that only the main loop may touch: MPSSE state,
//! the JTAG port, both pipes' packet buffers, and the main-loop ends of the
//! two UART rings. Interrupt handlers talk to it only through `Shared`.
//!
//! Each `poll` does a bounded amount of work: at most one MPSSE byte, at most
//! one OUT packet's worth of UART bytes, and at most one IN packet per
//! channel.

use crate::ftdi::Channel;
use crate::jtag::{JtagPins, JtagPort, SpiTransceiver, TestClock};
use crate::mpsse::{Mpsse, ResponseSink};
use crate::pipe::{BulkEndpoints, Pipe};
use crate::ring::{Consumer, Producer, UART_RING_SIZE};
use crate::state::Shared;
use crate::uart::UartPort;

pub struct Bridge<'a, P, S, C> {
    shared: &'a Shared,
    mpsse: Mpsse,
    port: JtagPort<P, S, C>,
    jtag: Pipe,
    uart: Pipe,
    /// Bytes the target sent us, on their way to the host.
    uart_rx: Consumer<'a, UART_RING_SIZE>,
    /// Bytes from the host, on their way to the target.
    uart_tx: Producer<'a, UART_RING_SIZE>,
    /// Last bus reset we've cleaned up after.
    epoch: u8,
}

impl<'a, P, S, C> Bridge<'a, P, S, C>
where
    P: JtagPins,
    S: SpiTransceiver,
    C: TestClock,
{
    pub fn new(
        shared: &'a Shared,
        mpsse: Mpsse,
        port: JtagPort<P, S, C>,
        uart_rx: Consumer<'a, UART_RING_SIZE>,
        uart_tx: Producer<'a, UART_RING_SIZE>,
    ) -> Self {
        let now = shared.now();
        Self {
            shared,
            mpsse,
            port,
            jtag: Pipe::new(Channel::Jtag, now),
            uart: Pipe::new(Channel::Uart, now),
            uart_rx,
            uart_tx,
            epoch: shared.epoch(),
        }
    }

    pub fn mpsse(&self) -> &Mpsse {
        &self.mpsse
    }

    /// One pass of the main loop.
    pub fn poll<B, U>(&mut self, bulk: &mut B, uart: &mut U)
    where
        B: BulkEndpoints,
        U: UartPort,
    {
        let now = self.shared.now();

        let epoch = self.shared.epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            self.after_bus_reset(uart, now);
        }

        let shared = self.shared;
        let config = &shared.config;
        if !config.is_configured() {
            return;
        }

        if let Some(baud) = config.take_baud() {
            uart.set_baud(baud);
        }
        for channel in Channel::ALL {
            if config.take_purge(channel) {
                self.purge(channel, uart, now);
            }
        }

        self.pump_jtag(bulk, now);
        self.pump_uart(bulk, uart, now);
    }

    fn after_bus_reset<U: UartPort>(&mut self, uart: &mut U, now: u16) {
        log::debug!("bridge: reset");
        self.mpsse.reset(&mut self.port);
        self.port.spi_off();
        self.jtag.reset(now);
        self.uart.reset(now);
        self.uart_rx.clear();
        uart.clear_tx();
    }

    fn purge<U: UartPort>(&mut self, channel: Channel, uart: &mut U, now: u16) {
        log::debug!("bridge: purge {:?}", channel);
        match channel {
            Channel::Jtag => {
                self.jtag.purge(now);
                self.mpsse.reset(&mut self.port);
            }
            Channel::Uart => {
                self.uart.purge(now);
                self.uart_rx.clear();
                uart.clear_tx();
            }
        }
    }

    fn pump_jtag<B: BulkEndpoints>(&mut self, bulk: &mut B, now: u16) {
        let shared = self.shared;
        let signals = shared.pipe(Channel::Jtag);
        self.jtag.receive(signals, bulk);

        // A step answers with at most one byte.
        if self.jtag.tx.room() > 0 {
            if let Some(byte) = self.jtag.out.next_byte() {
                self.mpsse.step(byte, &mut self.port, &mut self.jtag.tx);
            }
        }
        self.jtag.rearm(bulk);

        let latency = shared.config.latency(Channel::Jtag);
        self.jtag.flush(signals, bulk, now, latency);
    }

    fn pump_uart<B: BulkEndpoints, U: UartPort>(&mut self, bulk: &mut B, uart: &mut U, now: u16) {
        let shared = self.shared;
        let signals = shared.pipe(Channel::Uart);
        self.uart.receive(signals, bulk);

        let mut queued = false;
        while let Some(byte) = self.uart.out.peek() {
            if !self.uart_tx.push(byte) {
                break;
            }
            self.uart.out.advance();
            queued = true;
        }
        if queued {
            uart.kick_tx();
        }
        self.uart.rearm(bulk);

        while self.uart.tx.room() > 0 {
            match self.uart_rx.pop() {
                Some(byte) => self.uart.tx.push(byte),
                None => break,
            }
        }
        let latency = shared.config.latency(Channel::Uart);
        self.uart.flush(signals, bulk, now, latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;

    use crate::ftdi::BaudSetting;
    use crate::mock::{MockBulk, MockClock, MockPins, MockSpi};
    use crate::mpsse::MpsseState;
    use crate::ring::RingBuffer;
    use crate::state::DEFAULT_LATENCY;

    type TestBridge<'a> = Bridge<'a, MockPins, MockSpi, MockClock>;

    fn port() -> JtagPort<MockPins, MockSpi, MockClock> {
        JtagPort::new(MockPins::default(), MockSpi::default(), MockClock::default())
    }

    fn host_out(shared: &Shared, bulk: &mut MockBulk, channel: Channel, data: &[u8]) {
        bulk.host_sends(channel, data);
        shared.pipe(channel).out_complete(data.len() as u8);
    }

    fn configure(shared: &Shared) {
        shared.config.configuration.store(1, Ordering::Release);
    }

    fn run(b: &mut TestBridge<'_>, shared: &Shared, bulk: &mut MockBulk, polls: usize) {
        for _ in 0..polls {
            b.poll(bulk, &mut MockBulk::default());
            shared.tick();
        }
    }

    #[test]
    fn test_idle_until_configured() {
        let shared = Shared::new();
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (_, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();

        run(&mut b, &shared, &mut bulk, 10);
        assert_eq!(bulk.arms(Channel::Jtag), 0);
        assert!(bulk.sent(Channel::Jtag).is_empty());

        configure(&shared);
        run(&mut b, &shared, &mut bulk, 1);
        assert_eq!(bulk.arms(Channel::Jtag), 1);
        assert_eq!(bulk.arms(Channel::Uart), 1);
    }

    #[test]
    fn test_mpsse_read_reaches_host() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (_, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();

        run(&mut b, &shared, &mut bulk, 1);
        // GET_BITS_LOW, then SEND_IMMEDIATE.
        host_out(&shared, &mut bulk, Channel::Jtag, &[0x81, 0x87]);
        run(&mut b, &shared, &mut bulk, 2);
        assert_eq!(bulk.sent(Channel::Jtag).last(), Some(&vec![0x01, 0x60, 0x01]));
        // Drained, so the OUT endpoint was re-armed.
        assert_eq!(bulk.arms(Channel::Jtag), 2);
    }

    #[test]
    fn test_heartbeat_flush_on_latency() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (_, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();

        run(&mut b, &shared, &mut bulk, usize::from(DEFAULT_LATENCY));
        assert!(bulk.sent(Channel::Uart).is_empty());
        run(&mut b, &shared, &mut bulk, 1);
        assert_eq!(bulk.sent(Channel::Uart), vec![vec![0x01, 0x60]]);

        // Nothing more until the host collects it.
        run(&mut b, &shared, &mut bulk, 20);
        assert_eq!(bulk.sent(Channel::Uart).len(), 1);
        shared.pipe(Channel::Uart).in_complete();
        run(&mut b, &shared, &mut bulk, 1);
        assert_eq!(bulk.sent(Channel::Uart).len(), 2);
    }

    #[test]
    fn test_uart_both_directions() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (mut rx_prod, rx_cons) = rx.split();
        let (tx_prod, mut tx_cons) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();
        let mut uart = MockBulk::default();

        b.poll(&mut bulk, &mut uart);
        host_out(&shared, &mut bulk, Channel::Uart, b"hello");
        b.poll(&mut bulk, &mut uart);
        assert_eq!(uart.kicks, 1);
        let mut out = [0; 8];
        assert_eq!(tx_cons.pop_into(&mut out), 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(bulk.arms(Channel::Uart), 2);

        for &c in b"ok" {
            rx_prod.push(c);
        }
        for _ in 0..=DEFAULT_LATENCY {
            b.poll(&mut bulk, &mut uart);
            shared.tick();
        }
        assert_eq!(bulk.sent(Channel::Uart), vec![vec![0x01, 0x60, b'o', b'k']]);
    }

    #[test]
    fn test_uart_out_waits_for_ring_space() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::<UART_RING_SIZE>::new());
        let (_, rx_cons) = rx.split();
        let (mut tx_prod_fill, mut tx_cons) = tx.split();
        for _ in 0..UART_RING_SIZE - 10 {
            tx_prod_fill.push(0);
        }
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod_fill);
        let mut bulk = MockBulk::default();
        let mut uart = MockBulk::default();

        b.poll(&mut bulk, &mut uart);
        host_out(&shared, &mut bulk, Channel::Uart, &[7; 64]);
        b.poll(&mut bulk, &mut uart);
        assert_eq!(tx_cons.len(), UART_RING_SIZE);
        // Packet still partly held, so no re-arm yet.
        assert_eq!(bulk.arms(Channel::Uart), 1);

        let mut sink = [0; UART_RING_SIZE];
        tx_cons.pop_into(&mut sink);
        b.poll(&mut bulk, &mut uart);
        assert_eq!(tx_cons.len(), 54);
        assert_eq!(bulk.arms(Channel::Uart), 2);
    }

    #[test]
    fn test_bus_reset_abandons_command() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (mut rx_prod, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();

        run(&mut b, &shared, &mut bulk, 1);
        host_out(&shared, &mut bulk, Channel::Jtag, &[0x19, 0x10, 0x00, 1, 2]);
        run(&mut b, &shared, &mut bulk, 5);
        assert_eq!(b.mpsse().state(), MpsseState::TransmitBytes(crate::jtag::BitOrder::Lsb));
        rx_prod.push(0x55);

        shared.bus_reset();
        configure(&shared);
        run(&mut b, &shared, &mut bulk, 1);
        assert!(b.mpsse().is_idle());
        // The stale UART byte was dropped with the rest.
        assert!(b.uart.tx.payload().is_empty());
        // Endpoint re-armed from scratch.
        assert_eq!(bulk.arms(Channel::Jtag), 3);
    }

    #[test]
    fn test_purge_and_baud() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (_, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();
        let mut uart = MockBulk::default();

        b.poll(&mut bulk, &mut uart);
        host_out(&shared, &mut bulk, Channel::Jtag, &[0x19, 0x03, 0x00]);
        for _ in 0..3 {
            b.poll(&mut bulk, &mut uart);
        }
        assert!(!b.mpsse().is_idle());

        shared.config.purge[0].store(true, Ordering::Release);
        let baud = BaudSetting::from_divisor(26);
        shared.config.baud.store(baud.to_bits(), Ordering::Relaxed);
        shared.config.baud_changed.store(true, Ordering::Release);
        b.poll(&mut bulk, &mut uart);
        assert!(b.mpsse().is_idle());
        assert_eq!(uart.bauds, vec![baud]);
    }

    #[test]
    fn test_bus_reset_and_uart_purge_drop_queued_target_bytes() {
        let shared = Shared::new();
        configure(&shared);
        let (mut rx, mut tx) = (RingBuffer::new(), RingBuffer::new());
        let (_, rx_cons) = rx.split();
        let (tx_prod, _) = tx.split();
        let mut b = Bridge::new(&shared, Mpsse::new(true), port(), rx_cons, tx_prod);
        let mut bulk = MockBulk::default();
        let mut uart = MockBulk::default();

        b.poll(&mut bulk, &mut uart);
        host_out(&shared, &mut bulk, Channel::Uart, b"hello");
        b.poll(&mut bulk, &mut uart);
        assert_eq!(uart.tx_clears, 0);

        shared.bus_reset();
        configure(&shared);
        b.poll(&mut bulk, &mut uart);
        assert_eq!(uart.tx_clears, 1);

        shared.config.purge[0].store(true, Ordering::Release);
        b.poll(&mut bulk, &mut uart);
        assert_eq!(uart.tx_clears, 1);

        shared.config.purge[1].store(true, Ordering::Release);
        b.poll(&mut bulk, &mut uart);
        assert_eq!(uart.tx_clears, 2);
    }
}
