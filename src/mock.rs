// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-ins for the hardware traits, for unit tests.

use crate::control::ControlEndpoint;
use crate::ftdi::{BaudSetting, Channel};
use crate::jtag::{BitBangSpi, BitOrder, JtagPins, SpiTransceiver, TestClock};
use crate::mpsse::ResponseSink;
use crate::pipe::BulkEndpoints;
use crate::uart::{ModemLines, UartPort};

/// JTAG pins that record what they were driven to on every rising TCK edge
/// and play back a scripted TDO sequence (then zeros).
#[derive(Debug, Default)]
pub struct MockPins {
    pub tck: bool,
    pub tdi: bool,
    pub tms: bool,
    pub rising_edges: usize,
    /// `(tdi, tms)` at each rising edge.
    edges: Vec<(bool, bool)>,
    tdo: Vec<bool>,
    tdo_pos: usize,
}

impl MockPins {
    pub fn with_tdo(tdo: &[bool]) -> Self {
        Self {
            tdo: tdo.to_vec(),
            ..Self::default()
        }
    }

    pub fn tdi_at_rising_edges(&self) -> Vec<bool> {
        self.edges.iter().map(|&(tdi, _)| tdi).collect()
    }

    pub fn tms_at_rising_edges(&self) -> Vec<bool> {
        self.edges.iter().map(|&(_, tms)| tms).collect()
    }
}

impl JtagPins for MockPins {
    fn set_tck(&mut self, high: bool) {
        if high && !self.tck {
            self.rising_edges += 1;
            self.edges.push((self.tdi, self.tms));
        }
        self.tck = high;
    }

    fn set_tdi(&mut self, high: bool) {
        self.tdi = high;
    }

    fn set_tms(&mut self, high: bool) {
        self.tms = high;
    }

    fn tdo(&mut self) -> bool {
        let bit = self.tdo.get(self.tdo_pos).copied().unwrap_or(false);
        self.tdo_pos += 1;
        bit
    }
}

/// Byte engine that bit-bangs like `BitBangSpi` but remembers whether it
/// was switched on.
#[derive(Debug, Default)]
pub struct MockSpi {
    pub enabled: bool,
}

impl SpiTransceiver for MockSpi {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn transfer<P: JtagPins>(&mut self, pins: &mut P, order: BitOrder, byte: u8) -> u8 {
        BitBangSpi.transfer(pins, order, byte)
    }
}

#[derive(Debug, Default)]
pub struct MockClock {
    pub running: bool,
}

impl TestClock for MockClock {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

#[derive(Debug, Default)]
pub struct MockSink {
    pub bytes: Vec<u8>,
    pub flushes: usize,
}

impl ResponseSink for MockSink {
    fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    fn request_flush(&mut self) {
        self.flushes += 1;
    }
}

#[derive(Debug, Default)]
pub struct MockLines {
    pub events: Vec<(&'static str, bool)>,
}

impl ModemLines for MockLines {
    fn set_dtr(&mut self, high: bool) {
        self.events.push(("dtr", high));
    }

    fn set_rts(&mut self, high: bool) {
        self.events.push(("rts", high));
    }
}

#[derive(Debug, Default)]
pub struct MockEp0 {
    pub in_packets: Vec<Vec<u8>>,
    pub out_arms: usize,
    pub stalls: usize,
    pub address: Option<u8>,
    pub halts: Vec<(u8, bool)>,
}

impl MockEp0 {
    pub fn take_in_packets(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.in_packets)
    }
}

impl ControlEndpoint for MockEp0 {
    fn write_in(&mut self, data: &[u8]) {
        assert!(data.len() <= 64);
        self.in_packets.push(data.to_vec());
    }

    fn expect_out(&mut self) {
        self.out_arms += 1;
    }

    fn stall(&mut self) {
        self.stalls += 1;
    }

    fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }

    fn set_endpoint_halt(&mut self, endpoint: u8, halted: bool) {
        self.halts.push((endpoint, halted));
    }
}

/// Both bulk pipes plus the UART, as seen from the main loop.
#[derive(Debug, Default)]
pub struct MockBulk {
    pending_out: [Vec<u8>; 2],
    sent_in: [Vec<Vec<u8>>; 2],
    out_arms: [usize; 2],
    pub bauds: Vec<BaudSetting>,
    pub kicks: usize,
    pub tx_clears: usize,
}

impl MockBulk {
    /// Puts `data` in `channel`'s OUT buffer, as the hardware would. The
    /// caller signals completion separately.
    pub fn host_sends(&mut self, channel: Channel, data: &[u8]) {
        assert!(data.len() <= 64);
        self.pending_out[channel.index()] = data.to_vec();
    }

    pub fn sent(&self, channel: Channel) -> Vec<Vec<u8>> {
        self.sent_in[channel.index()].clone()
    }

    pub fn arms(&self, channel: Channel) -> usize {
        self.out_arms[channel.index()]
    }
}

impl BulkEndpoints for MockBulk {
    fn read_out(&mut self, channel: Channel, out: &mut [u8]) -> usize {
        let data = core::mem::take(&mut self.pending_out[channel.index()]);
        let n = data.len().min(out.len());
        out[..n].copy_from_slice(&data[..n]);
        n
    }

    fn arm_out(&mut self, channel: Channel) {
        self.out_arms[channel.index()] += 1;
    }

    fn write_in(&mut self, channel: Channel, data: &[u8]) {
        assert!(data.len() <= 64);
        self.sent_in[channel.index()].push(data.to_vec());
    }
}

impl UartPort for MockBulk {
    fn kick_tx(&mut self) {
        self.kicks += 1;
    }

    fn clear_tx(&mut self) {
        self.tx_clears += 1;
    }

    fn set_baud(&mut self, setting: BaudSetting) {
        self.bauds.push(setting);
    }
}
