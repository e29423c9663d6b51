// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Main-loop half of the bulk pipes.
//!
//! Each channel has an OUT endpoint the host writes commands or UART data
//! into, and an IN endpoint we answer on. The interrupt side of this lives in
//! `state::PipeSignals` and only moves flags; everything that touches packet
//! contents is here.
//!
//! OUT packets are re-armed only once every byte has been consumed, which is
//! what throttles the host when the MPSSE engine or the UART falls behind.
//!
//! IN packets follow FTDI framing: two modem status bytes, then up to 62
//! bytes of payload. A packet goes out when the payload area is full, when
//! the MPSSE stream asks for an immediate flush, or when the channel's
//! latency timer runs out, whichever comes first. An empty payload is fine;
//! the host drivers expect that heartbeat.

use crate::descriptors::BULK_PACKET_SIZE;
use crate::ftdi::{Channel, MODEM_STATUS};
use crate::mpsse::ResponseSink;
use crate::state::PipeSignals;

/// Modem status bytes at the front of every IN packet.
pub const HEADER_LEN: usize = MODEM_STATUS.len();
/// Payload bytes per IN packet.
pub const PAYLOAD_CAPACITY: usize = BULK_PACKET_SIZE - HEADER_LEN;

/// Endpoint buffer access for the bulk pipes.
pub trait BulkEndpoints {
    /// Copies the packet the hardware received on `channel`'s OUT endpoint
    /// into `out`, returning the number of bytes copied.
    fn read_out(&mut self, channel: Channel, out: &mut [u8]) -> usize;
    /// Lets the host send another OUT packet on `channel`.
    fn arm_out(&mut self, channel: Channel);
    /// Queues `data` as the next IN packet on `channel`.
    fn write_in(&mut self, channel: Channel, data: &[u8]);
}

/// Main loop's copy of the last OUT packet, plus a read cursor.
pub struct OutPacket {
    buf: [u8; BULK_PACKET_SIZE],
    len: usize,
    cursor: usize,
}

impl OutPacket {
    pub const fn new() -> Self {
        Self {
            buf: [0; BULK_PACKET_SIZE],
            len: 0,
            cursor: 0,
        }
    }

    /// True while unread bytes remain.
    pub fn is_holding(&self) -> bool {
        self.cursor < self.len
    }

    pub fn remaining(&self) -> usize {
        self.len - self.cursor
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf[..self.len].get(self.cursor).copied()
    }

    /// Consumes the byte under the cursor.
    pub fn advance(&mut self) {
        if self.cursor < self.len {
            self.cursor += 1;
        }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.cursor += 1;
        Some(b)
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.cursor = 0;
    }

    fn load_from<B: BulkEndpoints>(&mut self, bulk: &mut B, channel: Channel, len: usize) {
        let len = len.min(BULK_PACKET_SIZE);
        self.len = bulk.read_out(channel, &mut self.buf[..len]).min(len);
        self.cursor = 0;
    }
}

impl Default for OutPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// IN packet being assembled.
pub struct TxStaging {
    buf: [u8; BULK_PACKET_SIZE],
    fill: usize,
    force: bool,
    last_flush: u16,
}

impl TxStaging {
    pub const fn new(now: u16) -> Self {
        let mut buf = [0; BULK_PACKET_SIZE];
        buf[0] = MODEM_STATUS[0];
        buf[1] = MODEM_STATUS[1];
        Self {
            buf,
            fill: HEADER_LEN,
            force: false,
            last_flush: now,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_LEN..self.fill]
    }

    pub fn room(&self) -> usize {
        BULK_PACKET_SIZE - self.fill
    }

    pub fn is_full(&self) -> bool {
        self.room() == 0
    }

    /// Whether a packet should go out now, given the current tick and the
    /// channel's latency timer. Doesn't look at the pipe's busy flag.
    pub fn is_due(&self, now: u16, latency: u8) -> bool {
        self.is_full() || self.force || now.wrapping_sub(self.last_flush) >= u16::from(latency)
    }

    /// Hands out the finished packet and starts a new one.
    pub fn take(&mut self, now: u16) -> &[u8] {
        let len = self.fill;
        self.buf[..HEADER_LEN].copy_from_slice(&MODEM_STATUS);
        self.fill = HEADER_LEN;
        self.force = false;
        self.last_flush = now;
        &self.buf[..len]
    }

    /// Drops any staged payload and restarts the latency timer.
    pub fn discard(&mut self, now: u16) {
        self.fill = HEADER_LEN;
        self.force = false;
        self.last_flush = now;
    }
}

impl ResponseSink for TxStaging {
    fn push(&mut self, byte: u8) {
        // Callers check `room()` first; a byte with nowhere to go is dropped
        // rather than corrupting the next packet.
        if let Some(slot) = self.buf.get_mut(self.fill) {
            *slot = byte;
            self.fill += 1;
        }
    }

    fn request_flush(&mut self) {
        self.force = true;
    }
}

/// One channel's main-loop pipe state.
pub struct Pipe {
    pub channel: Channel,
    pub out: OutPacket,
    pub tx: TxStaging,
    /// OUT endpoint has been handed to the hardware and not yet filled.
    out_armed: bool,
}

impl Pipe {
    pub const fn new(channel: Channel, now: u16) -> Self {
        Self {
            channel,
            out: OutPacket::new(),
            tx: TxStaging::new(now),
            out_armed: false,
        }
    }

    /// Picks up a newly received OUT packet, if the previous one is used up.
    /// Returns true if one was taken.
    pub fn receive<B: BulkEndpoints>(&mut self, signals: &PipeSignals, bulk: &mut B) -> bool {
        if self.out.is_holding() {
            return false;
        }
        match signals.take_out() {
            Some(len) => {
                self.out_armed = false;
                self.out.load_from(bulk, self.channel, usize::from(len));
                log::trace!("{:?}: out {} bytes", self.channel, self.out.remaining());
                true
            }
            None => false,
        }
    }

    /// Arms the OUT endpoint if the last packet has been fully consumed.
    pub fn rearm<B: BulkEndpoints>(&mut self, bulk: &mut B) {
        if !self.out_armed && !self.out.is_holding() {
            self.out.clear();
            self.out_armed = true;
            bulk.arm_out(self.channel);
        }
    }

    /// Sends the staged IN packet if the endpoint is free and the flush
    /// policy says so. Returns true if a packet went out.
    pub fn flush<B: BulkEndpoints>(
        &mut self,
        signals: &PipeSignals,
        bulk: &mut B,
        now: u16,
        latency: u8,
    ) -> bool {
        if signals.in_busy() || !self.tx.is_due(now, latency) {
            return false;
        }
        // Busy goes up before the buffer is armed so the completion can't
        // be missed.
        signals.mark_in_busy();
        let packet = self.tx.take(now);
        log::trace!("{:?}: in {} bytes", self.channel, packet.len());
        bulk.write_in(self.channel, packet);
        true
    }

    /// Drops everything buffered in both directions. The OUT endpoint is
    /// re-armed on the next `rearm`.
    pub fn purge(&mut self, now: u16) {
        self.out.clear();
        self.tx.discard(now);
    }

    /// Back to power-on state after a bus reset; the hardware has disarmed
    /// the endpoint.
    pub fn reset(&mut self, now: u16) {
        self.purge(now);
        self.out_armed = false;
    }
}
