// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State shared between interrupt handlers and the main loop.
//!
//! There are no locks here. Instead every field has exactly one writer per
//! transition, noted in its doc comment, and everything is an atomic so that
//! the compiler can't cache or reorder the accesses. Only loads and stores
//! are used since the M0+ has nothing fancier.
//!
//! The USB interrupt and the tick interrupt run at the same priority, so they
//! never preempt each other. Where both write a field, that's why it's okay.
//!
//! MPSSE session state is deliberately absent: it belongs to the main loop
//! alone. A bus reset is signalled to the main loop through `reset_epoch`
//! and the main loop resets its own state when it notices.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::ftdi::{BaudSetting, Channel};

/// Latency timer value after power-on and bus reset, in ticks.
pub const DEFAULT_LATENCY: u8 = 4;

/// Device configuration, mutated by the control dispatcher.
pub struct UsbConfig {
    /// Address assigned by SET_ADDRESS, once its status stage is done.
    /// Writer: USB interrupt.
    pub address: AtomicU8,
    /// Value from SET_CONFIGURATION, 0 while unconfigured. Writer: USB
    /// interrupt.
    pub configuration: AtomicU8,
    /// One bit per bulk endpoint, in `descriptors::BULK_ENDPOINTS` order.
    /// Writer: USB interrupt.
    pub halted: AtomicU8,
    /// Latency timer per channel, in ticks. Writer: USB interrupt.
    pub latency: [AtomicU8; 2],
    /// Requested DTR level. Writer: USB interrupt.
    pub soft_dtr: AtomicBool,
    /// Requested RTS level. Writer: USB interrupt.
    pub soft_rts: AtomicBool,
    /// Ticks left before the soft lines are applied. Writers: USB interrupt
    /// (arms), tick interrupt (counts down).
    pub modem_countdown: AtomicU8,
    /// Host asked for the bootloader. Writer: USB interrupt.
    pub reboot_requested: AtomicBool,
    /// Per-channel purge request. Set by the USB interrupt, cleared by the
    /// main loop once it has dropped the channel's buffered data.
    pub purge: [AtomicBool; 2],
    /// Last UART baud setting, packed by `BaudSetting::to_bits`. Writer: USB
    /// interrupt.
    pub baud: AtomicU16,
    /// `baud` changed and hasn't been applied. Set by the USB interrupt,
    /// cleared by the main loop.
    pub baud_changed: AtomicBool,
}

/// Plain copy of `UsbConfig`, for logging and comparison.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub address: u8,
    pub configuration: u8,
    pub halted: u8,
    pub latency: [u8; 2],
    pub soft_dtr: bool,
    pub soft_rts: bool,
    pub modem_countdown: u8,
    pub reboot_requested: bool,
}

impl Default for ConfigSnapshot {
    /// Power-on values.
    fn default() -> Self {
        Self {
            address: 0,
            configuration: 0,
            halted: 0,
            latency: [DEFAULT_LATENCY; 2],
            soft_dtr: false,
            soft_rts: false,
            modem_countdown: 0,
            reboot_requested: false,
        }
    }
}

impl UsbConfig {
    pub const fn new() -> Self {
        Self {
            address: AtomicU8::new(0),
            configuration: AtomicU8::new(0),
            halted: AtomicU8::new(0),
            latency: [AtomicU8::new(DEFAULT_LATENCY), AtomicU8::new(DEFAULT_LATENCY)],
            soft_dtr: AtomicBool::new(false),
            soft_rts: AtomicBool::new(false),
            modem_countdown: AtomicU8::new(0),
            reboot_requested: AtomicBool::new(false),
            purge: [AtomicBool::new(false), AtomicBool::new(false)],
            baud: AtomicU16::new(BaudSetting::DEFAULT.to_bits()),
            baud_changed: AtomicBool::new(false),
        }
    }

    /// Returns to power-on values. Called from the USB interrupt on bus
    /// reset. The baud rate survives, as it does on real FTDI parts, and a
    /// pending reboot is not cancelled.
    pub fn reset(&self) {
        self.address.store(0, Ordering::Relaxed);
        self.configuration.store(0, Ordering::Relaxed);
        self.halted.store(0, Ordering::Relaxed);
        for l in &self.latency {
            l.store(DEFAULT_LATENCY, Ordering::Relaxed);
        }
        self.soft_dtr.store(false, Ordering::Relaxed);
        self.soft_rts.store(false, Ordering::Relaxed);
        self.modem_countdown.store(0, Ordering::Relaxed);
        for p in &self.purge {
            p.store(false, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            address: self.address.load(Ordering::Relaxed),
            configuration: self.configuration.load(Ordering::Relaxed),
            halted: self.halted.load(Ordering::Relaxed),
            latency: [
                self.latency[0].load(Ordering::Relaxed),
                self.latency[1].load(Ordering::Relaxed),
            ],
            soft_dtr: self.soft_dtr.load(Ordering::Relaxed),
            soft_rts: self.soft_rts.load(Ordering::Relaxed),
            modem_countdown: self.modem_countdown.load(Ordering::Relaxed),
            reboot_requested: self.reboot_requested.load(Ordering::Relaxed),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configuration.load(Ordering::Acquire) != 0
    }

    pub fn latency(&self, channel: Channel) -> u8 {
        self.latency[channel.index()].load(Ordering::Relaxed)
    }

    pub fn set_halted(&self, bit: u8, halted: bool) {
        let mask = self.halted.load(Ordering::Relaxed);
        let mask = if halted { mask | bit } else { mask & !bit };
        self.halted.store(mask, Ordering::Relaxed);
    }

    pub fn is_halted(&self, bit: u8) -> bool {
        self.halted.load(Ordering::Relaxed) & bit != 0
    }

    /// Takes a pending baud change, if any. Main loop only.
    pub fn take_baud(&self) -> Option<BaudSetting> {
        if self.baud_changed.load(Ordering::Acquire) {
            self.baud_changed.store(false, Ordering::Relaxed);
            Some(BaudSetting::from_bits(self.baud.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Takes a pending purge of `channel`. Main loop only.
    pub fn take_purge(&self, channel: Channel) -> bool {
        let flag = &self.purge[channel.index()];
        if flag.load(Ordering::Acquire) {
            flag.store(false, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion flags for one bulk pipe pair.
pub struct PipeSignals {
    /// A packet has landed in the OUT buffer. Set by the USB interrupt,
    /// cleared by the main loop when it takes the packet.
    pub out_ready: AtomicBool,
    /// Size of that packet. Writer: USB interrupt, before `out_ready`.
    pub out_length: AtomicU8,
    /// An IN packet is armed. Set by the main loop before arming, cleared by
    /// the USB interrupt when the host has collected it.
    pub in_busy: AtomicBool,
}

impl PipeSignals {
    pub const fn new() -> Self {
        Self {
            out_ready: AtomicBool::new(false),
            out_length: AtomicU8::new(0),
            in_busy: AtomicBool::new(false),
        }
    }

    /// OUT transfer complete. USB interrupt only; the buffer itself is not
    /// touched here.
    pub fn out_complete(&self, len: u8) {
        self.out_length.store(len, Ordering::Relaxed);
        self.out_ready.store(true, Ordering::Release);
    }

    /// IN transfer complete. USB interrupt only.
    pub fn in_complete(&self) {
        self.in_busy.store(false, Ordering::Release);
    }

    /// Takes the length of a freshly received packet. Main loop only.
    pub fn take_out(&self) -> Option<u8> {
        if self.out_ready.load(Ordering::Acquire) {
            self.out_ready.store(false, Ordering::Relaxed);
            Some(self.out_length.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn in_busy(&self) -> bool {
        self.in_busy.load(Ordering::Acquire)
    }

    /// Main loop, immediately before arming an IN buffer.
    pub fn mark_in_busy(&self) {
        self.in_busy.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.out_ready.store(false, Ordering::Relaxed);
        self.out_length.store(0, Ordering::Relaxed);
        self.in_busy.store(false, Ordering::Relaxed);
    }
}

impl Default for PipeSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// The whole device context.
pub struct Shared {
    /// Free-running millisecond counter. Writer: tick interrupt.
    pub ticks: AtomicU16,
    pub config: UsbConfig,
    /// Indexed by `Channel`.
    pub pipes: [PipeSignals; 2],
    /// Bumped on every bus reset. Writer: USB interrupt.
    pub reset_epoch: AtomicU8,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU16::new(0),
            config: UsbConfig::new(),
            pipes: [PipeSignals::new(), PipeSignals::new()],
            reset_epoch: AtomicU8::new(0),
        }
    }

    pub fn pipe(&self, channel: Channel) -> &PipeSignals {
        &self.pipes[channel.index()]
    }

    pub fn now(&self) -> u16 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advances the tick counter. Tick interrupt only.
    pub fn tick(&self) {
        let t = self.ticks.load(Ordering::Relaxed);
        self.ticks.store(t.wrapping_add(1), Ordering::Relaxed);
    }

    /// Bus reset, from the USB interrupt: flags and configuration back to
    /// power-on values, then tell the main loop to reset the rest.
    pub fn bus_reset(&self) {
        self.config.reset();
        for p in &self.pipes {
            p.reset();
        }
        let e = self.reset_epoch.load(Ordering::Relaxed);
        self.reset_epoch.store(e.wrapping_add(1), Ordering::Release);
    }

    pub fn epoch(&self) -> u8 {
        self.reset_epoch.load(Ordering::Acquire)
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}
