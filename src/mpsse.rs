// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MPSSE command interpreter.
//!
//! FTDI's Multi-Protocol Synchronous Serial Engine takes a byte stream of
//! opcodes, each followed by a fixed or length-prefixed run of argument
//! bytes. We implement the subset that JTAG tools actually send, and accept
//! (and ignore) the GPIO/clock setup commands they send around it.
//!
//! The interpreter is fed exactly one byte per `step`, which keeps the main
//! loop's work per iteration bounded no matter how long the command is. Each
//! step produces at most one response byte, so the caller only has to
//! guarantee one free byte in the IN staging buffer before stepping.
//!
//! This state belongs to the main loop. Nothing in interrupt context may
//! touch it.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::jtag::{BitOrder, JtagPins, JtagPort, SpiTransceiver, TestClock};

/// Where response bytes go: the JTAG channel's IN staging buffer.
pub trait ResponseSink {
    fn push(&mut self, byte: u8);
    /// Send whatever is staged at the next opportunity, without waiting for
    /// the latency timer.
    fn request_flush(&mut self);
}

/// Byte answered for any opcode we don't implement.
pub const BAD_COMMAND: u8 = 0xFA;

/// Byte-clock lengths that one vendor's internal-flash programming sequence
/// uses to wait out erase/program cycles. Clocking these through SPI is far
/// too slow; they're run on the free-running test clock instead.
pub const RUN_TEST_LENGTHS: [u16; 3] = [25000, 750, 2968];

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum Opcode {
    SetBitsLow = 0x80,
    GetBitsLow = 0x81,
    SetBitsHigh = 0x82,
    GetBitsHigh = 0x83,
    EnableLoopback = 0x84,
    DisableLoopback = 0x85,
    SetClockDivisor = 0x86,
    SendImmediate = 0x87,
    /// Clock bytes out, MSB first, on the negative edge.
    BytesOutMsb = 0x11,
    /// Clock bytes out, LSB first, on the negative edge.
    BytesOutLsb = 0x19,
    /// Clock bytes out and in, MSB first.
    BytesInOutMsb = 0x31,
    /// Clock bytes out and in, LSB first.
    BytesInOutLsb = 0x39,
    BitsOutMsb = 0x13,
    BitsOutLsb = 0x1b,
    BitsInOutLsb = 0x3b,
    TmsOut = 0x4b,
    TmsInOut = 0x6b,
}

impl Opcode {
    /// Bit 5 of a data-clocking opcode asks for TDO to be read back.
    fn reads(self) -> bool {
        self as u8 & 0x20 != 0
    }

    fn byte_order(self) -> BitOrder {
        match self {
            Opcode::BytesOutMsb | Opcode::BytesInOutMsb | Opcode::BitsOutMsb => BitOrder::Msb,
            _ => BitOrder::Lsb,
        }
    }
}

/// Where the interpreter is within the current command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MpsseState {
    Idle,
    LengthLow,
    LengthHigh,
    TransmitBytes(BitOrder),
    ShortLength,
    TransmitBits(BitOrder),
    TmsOut,
    /// Discarding this many more argument bytes.
    Skip(u8),
    /// Discarding one byte after an unknown opcode.
    Error,
    RunTest,
}

pub struct Mpsse {
    state: MpsseState,
    opcode: Opcode,
    /// Length field as received: one less than the byte count.
    length: u16,
    /// Data bytes still expected by the current byte command.
    remaining: u32,
    /// Bit-count field: one less than the number of bits.
    bits: u8,
    run_test_quirk: bool,
}

impl Mpsse {
    /// `run_test_quirk` enables the `RUN_TEST_LENGTHS` rerouting.
    pub const fn new(run_test_quirk: bool) -> Self {
        Self {
            state: MpsseState::Idle,
            opcode: Opcode::SendImmediate,
            length: 0,
            remaining: 0,
            bits: 0,
            run_test_quirk,
        }
    }

    pub fn state(&self) -> MpsseState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == MpsseState::Idle
    }

    /// Abandons any command in progress.
    pub fn reset<P, S, C>(&mut self, port: &mut JtagPort<P, S, C>)
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
    {
        if self.state == MpsseState::RunTest {
            port.stop_test_clock();
        }
        *self = Self::new(self.run_test_quirk);
    }

    /// Consumes one byte of the command stream.
    pub fn step<P, S, C, R>(&mut self, byte: u8, port: &mut JtagPort<P, S, C>, sink: &mut R)
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
        R: ResponseSink,
    {
        let state = self.state;
        self.state = match state {
            MpsseState::Idle => self.idle(byte, port, sink),
            MpsseState::LengthLow => self.length_low(byte),
            MpsseState::LengthHigh => self.length_high(byte, port),
            MpsseState::TransmitBytes(order) => self.transmit_byte(byte, order, port, sink),
            MpsseState::ShortLength => self.short_length(byte),
            MpsseState::TransmitBits(order) => self.transmit_bits(byte, order, port, sink),
            MpsseState::TmsOut => self.tms_out(byte, port, sink),
            MpsseState::Skip(n) => skip(n),
            MpsseState::Error => MpsseState::Idle,
            MpsseState::RunTest => self.run_test(port),
        };
    }

    fn idle<P, S, C, R>(&mut self, byte: u8, port: &mut JtagPort<P, S, C>, sink: &mut R) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
        R: ResponseSink,
    {
        let op = match Opcode::from_u8(byte) {
            Some(op) => op,
            None => {
                log::warn!("mpsse: bad command {:#04x}", byte);
                sink.push(BAD_COMMAND);
                return MpsseState::Error;
            }
        };
        log::trace!("mpsse: {:?}", op);
        match op {
            // Pin directions and levels, and the clock divisor, are fixed by
            // how the board is wired; swallow the two argument bytes.
            Opcode::SetBitsLow | Opcode::SetBitsHigh | Opcode::SetClockDivisor => {
                MpsseState::Skip(2)
            }
            // We don't track GPIO state, so hand back something stable.
            Opcode::GetBitsLow | Opcode::GetBitsHigh => {
                sink.push(byte - 0x80);
                MpsseState::Idle
            }
            Opcode::EnableLoopback | Opcode::DisableLoopback => MpsseState::Idle,
            Opcode::SendImmediate => {
                sink.request_flush();
                MpsseState::Idle
            }
            Opcode::BytesOutMsb
            | Opcode::BytesOutLsb
            | Opcode::BytesInOutMsb
            | Opcode::BytesInOutLsb => {
                self.opcode = op;
                port.spi_on();
                MpsseState::LengthLow
            }
            Opcode::BitsOutMsb
            | Opcode::BitsOutLsb
            | Opcode::BitsInOutLsb
            | Opcode::TmsOut
            | Opcode::TmsInOut => {
                self.opcode = op;
                port.spi_off();
                MpsseState::ShortLength
            }
        }
    }

    fn length_low(&mut self, byte: u8) -> MpsseState {
        self.length = u16::from(byte);
        MpsseState::LengthHigh
    }

    fn length_high<P, S, C>(&mut self, byte: u8, port: &mut JtagPort<P, S, C>) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
    {
        self.length |= u16::from(byte) << 8;
        self.remaining = u32::from(self.length) + 1;
        if self.run_test_quirk
            && !self.opcode.reads()
            && RUN_TEST_LENGTHS.contains(&self.length)
        {
            log::debug!("mpsse: run-test for {} bytes", self.remaining);
            port.spi_off();
            port.start_test_clock();
            return MpsseState::RunTest;
        }
        MpsseState::TransmitBytes(self.opcode.byte_order())
    }

    fn transmit_byte<P, S, C, R>(
        &mut self,
        byte: u8,
        order: BitOrder,
        port: &mut JtagPort<P, S, C>,
        sink: &mut R,
    ) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
        R: ResponseSink,
    {
        let rcv = port.shift_byte(order, byte);
        if self.opcode.reads() {
            sink.push(rcv);
        }
        self.countdown(MpsseState::TransmitBytes(order))
    }

    fn short_length(&mut self, byte: u8) -> MpsseState {
        self.bits = byte & 0x07;
        match self.opcode {
            Opcode::TmsOut | Opcode::TmsInOut => MpsseState::TmsOut,
            op => MpsseState::TransmitBits(op.byte_order()),
        }
    }

    fn transmit_bits<P, S, C, R>(
        &mut self,
        byte: u8,
        order: BitOrder,
        port: &mut JtagPort<P, S, C>,
        sink: &mut R,
    ) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
        R: ResponseSink,
    {
        let rcv = port.shift_bits(order, byte, self.bits + 1);
        if self.opcode.reads() {
            sink.push(rcv);
        }
        MpsseState::Idle
    }

    fn tms_out<P, S, C, R>(
        &mut self,
        byte: u8,
        port: &mut JtagPort<P, S, C>,
        sink: &mut R,
    ) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
        R: ResponseSink,
    {
        let rcv = port.shift_tms(byte, self.bits + 1);
        if self.opcode.reads() {
            sink.push(rcv);
        }
        MpsseState::Idle
    }

    fn run_test<P, S, C>(&mut self, port: &mut JtagPort<P, S, C>) -> MpsseState
    where
        P: JtagPins,
        S: SpiTransceiver,
        C: TestClock,
    {
        let next = self.countdown(MpsseState::RunTest);
        if next == MpsseState::Idle {
            port.stop_test_clock();
        }
        next
    }

    /// One data byte of a length-prefixed command is done.
    fn countdown(&mut self, busy: MpsseState) -> MpsseState {
        self.remaining -= 1;
        if self.remaining == 0 {
            MpsseState::Idle
        } else {
            busy
        }
    }
}

fn skip(n: u8) -> MpsseState {
    if n > 1 {
        MpsseState::Skip(n - 1)
    } else {
        MpsseState::Idle
    }
}
