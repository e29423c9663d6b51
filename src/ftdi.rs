// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FTDI vendor request vocabulary.

use num_derive::FromPrimitive;

/// FTDI "SIO" vendor requests. Codes are fixed by the host drivers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum FtdiRequest {
    Reset = 0x00,
    SetModemCtrl = 0x01,
    SetFlowCtrl = 0x02,
    SetBaudrate = 0x03,
    SetData = 0x04,
    PollModemStatus = 0x05,
    SetEventChar = 0x06,
    SetErrorChar = 0x07,
    SetLatencyTimer = 0x09,
    GetLatencyTimer = 0x0A,
    SetBitmode = 0x0B,
    ReadEeprom = 0x90,
    /// We have no EEPROM to write. Tools only do this while reprogramming
    /// the adapter, so it's taken as a request to reboot into the ROM
    /// bootloader instead.
    WriteEeprom = 0x91,
    /// Read chip ID. Acked, no effect.
    ReadChipId = 0x92,
}

/// The two logical channels. Channel A carries MPSSE, channel B the UART.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    Jtag = 0,
    Uart = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Jtag, Channel::Uart];

    /// Channel addressed by a vendor request's `wIndex`. Drivers use 1 for
    /// channel A and 2 for channel B, but some send 0 for A, so anything
    /// that isn't 2 is A.
    pub fn from_index(index: u16) -> Self {
        if index & 0xff == 2 {
            Channel::Uart
        } else {
            Channel::Jtag
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Reply to POLL_MODEM_STATUS, and the header on every bulk IN packet. Bit 0
/// of the first byte is the FTDI "reserved, always 1" marker; 0x60 in the
/// second says both transmitter registers are empty.
pub const MODEM_STATUS: [u8; 2] = [0x01, 0x60];

/// Decoded SET_MODEM_CTRL. `None` means the host left that line alone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModemControl {
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
}

impl ModemControl {
    /// `wValue` carries the new levels in the low byte and per-line write
    /// enables in the high byte; bit 0 is DTR and bit 1 RTS in both.
    pub fn from_value(value: u16) -> Self {
        let levels = value as u8;
        let enables = (value >> 8) as u8;
        let line = |bit: u8| (enables & bit != 0).then(|| levels & bit != 0);
        Self {
            dtr: line(0x01),
            rts: line(0x02),
        }
    }
}

/// Which clock the UART baud timer counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerClock {
    /// 1 MHz.
    Fast,
    /// `Fast` / 12, for rates too slow for an 8-bit reload at `Fast`.
    Standard,
}

/// UART baud timer setting: one bit time is `reload` ticks of `clock`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BaudSetting {
    pub clock: TimerClock,
    /// 1..=256
    pub reload: u16,
}

const FAST_CLOCK_HZ: u32 = 1_000_000;
const STANDARD_PRESCALE: u32 = 12;
const MAX_RELOAD: u32 = 256;

impl BaudSetting {
    /// Fastest rate we do, for divisors 0 and 1.
    pub const MAX: Self = Self {
        clock: TimerClock::Fast,
        reload: 1,
    };

    /// 9600 baud. Also the fallback for rates too slow to reach.
    pub const DEFAULT: Self = Self {
        clock: TimerClock::Fast,
        reload: 104,
    };

    /// Converts the divisor of a SET_BAUDRATE request.
    ///
    /// FTDI divisors are in units of 1/3 MHz (48 MHz / 16), with two
    /// sub-integer bits on top that we can't honor and so mask off. The
    /// reload is the divisor rescaled to our 1 MHz clock, rounded to nearest.
    pub fn from_divisor(value: u16) -> Self {
        let divisor = u32::from(value & 0x3fff);
        if divisor <= 1 {
            return Self::MAX;
        }
        let reload = (2 * divisor + 3) / 6;
        if reload <= MAX_RELOAD {
            return Self {
                clock: TimerClock::Fast,
                reload: reload as u16,
            };
        }
        let reload = reload / STANDARD_PRESCALE;
        if reload <= MAX_RELOAD {
            Self {
                clock: TimerClock::Standard,
                reload: reload as u16,
            }
        } else {
            Self::DEFAULT
        }
    }

    /// Resulting line rate in bits per second.
    pub fn baud_rate(&self) -> u32 {
        let hz = match self.clock {
            TimerClock::Fast => FAST_CLOCK_HZ,
            TimerClock::Standard => FAST_CLOCK_HZ / STANDARD_PRESCALE,
        };
        hz / u32::from(self.reload.max(1))
    }

    /// Packs into 16 bits: `reload - 1` in the low byte, bit 8 set for the
    /// standard clock.
    pub const fn to_bits(self) -> u16 {
        let clock = match self.clock {
            TimerClock::Fast => 0,
            TimerClock::Standard => 0x100,
        };
        clock | (self.reload - 1)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self {
            clock: if bits & 0x100 != 0 {
                TimerClock::Standard
            } else {
                TimerClock::Fast
            },
            reload: (bits & 0xff) + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_from_index() {
        assert_eq!(Channel::from_index(0), Channel::Jtag);
        assert_eq!(Channel::from_index(1), Channel::Jtag);
        assert_eq!(Channel::from_index(2), Channel::Uart);
        assert_eq!(Channel::from_index(0x0302), Channel::Uart);
        assert_eq!(Channel::from_index(7), Channel::Jtag);
    }

    #[test]
    fn test_modem_control_decode() {
        assert_eq!(
            ModemControl::from_value(0x0101),
            ModemControl {
                dtr: Some(true),
                rts: None
            }
        );
        assert_eq!(
            ModemControl::from_value(0x0302),
            ModemControl {
                dtr: Some(false),
                rts: Some(true)
            }
        );
        // Levels without enables change nothing.
        assert_eq!(
            ModemControl::from_value(0x0003),
            ModemControl {
                dtr: None,
                rts: None
            }
        );
    }

    #[test]
    fn test_baud_common_rates() {
        // 115200: libftdi sends divisor 26 with sub-integer bits set.
        let b = BaudSetting::from_divisor(0x001a | 0xc000);
        assert_eq!(b, BaudSetting { clock: TimerClock::Fast, reload: 9 });
        assert_eq!(b.baud_rate(), 111_111);

        // 9600: divisor 312.
        let b = BaudSetting::from_divisor(312);
        assert_eq!(b.reload, 104);
        assert_eq!(b.baud_rate(), 9615);
    }

    #[test]
    fn test_baud_fastest_and_rounding() {
        assert_eq!(BaudSetting::from_divisor(0), BaudSetting::MAX);
        assert_eq!(BaudSetting::from_divisor(1), BaudSetting::MAX);
        assert_eq!(BaudSetting::from_divisor(4).reload, 1);
        assert_eq!(BaudSetting::from_divisor(5).reload, 2);
    }

    #[test]
    fn test_baud_slow_rates_use_standard_clock() {
        // 1200 baud: divisor 2500 -> 833 fast ticks -> 69 standard ticks.
        let b = BaudSetting::from_divisor(2500);
        assert_eq!(b, BaudSetting { clock: TimerClock::Standard, reload: 69 });
        assert_eq!(b.baud_rate(), 1207);

        // Below ~325 baud even the standard clock runs out of reload.
        assert_eq!(BaudSetting::from_divisor(0x3fff), BaudSetting::DEFAULT);
    }

    #[test]
    fn test_baud_bits_pack() {
        let b = BaudSetting { clock: TimerClock::Standard, reload: 256 };
        assert_eq!(b.to_bits(), 0x1ff);
        assert_eq!(BaudSetting::from_bits(b.to_bits()), b);
        assert_eq!(BaudSetting::from_bits(BaudSetting::DEFAULT.to_bits()), BaudSetting::DEFAULT);
    }
}
