// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JTAG pins and the PWM test clock.
//!
//! TCK is on a PWM slice as well as SIO; the free-running test clock is that
//! slice with the pin function switched over.

use rp2040_pac::{PWM, RESETS};

use rp2040_ftdi::jtag::{JtagPins, TestClock};

use super::{read_pin, set_function, write_pin, Function, TCK_PIN, TDI_PIN, TDO_PIN, TMS_PIN};

/// The four JTAG signals through SIO.
pub struct GpioJtag;

impl JtagPins for GpioJtag {
    #[inline(always)]
    fn set_tck(&mut self, high: bool) {
        write_pin(TCK_PIN, high);
    }

    #[inline(always)]
    fn set_tdi(&mut self, high: bool) {
        write_pin(TDI_PIN, high);
    }

    #[inline(always)]
    fn set_tms(&mut self, high: bool) {
        write_pin(TMS_PIN, high);
    }

    #[inline(always)]
    fn tdo(&mut self) -> bool {
        read_pin(TDO_PIN)
    }
}

/// Raw PWM slice registers; the layout is CSR, DIV, CTR, CC, TOP at a
/// 0x14 stride.
const PWM_CH_STRIDE: usize = 0x14;
const PWM_CSR: usize = 0x00;
const PWM_DIV: usize = 0x04;
const PWM_CC: usize = 0x0c;
const PWM_TOP: usize = 0x10;
/// CSR: EN.
const PWM_CSR_EN: u32 = 1 << 0;
/// DIV: 8.4 fixed point, 1.0.
const PWM_DIV_ONE: u32 = 1 << 4;
/// 132 MHz / (131 + 1) = 1 MHz, 50% duty.
const TEST_CLOCK_TOP: u32 = 131;
const TEST_CLOCK_CC: u32 = 66;

/// Roughly 1 MHz square wave on TCK from its PWM slice.
pub struct PwmTestClock {
    slice: *mut u32,
}

impl PwmTestClock {
    pub fn init(resets: &RESETS, pwm: PWM) -> Self {
        drop(pwm);
        resets.reset.modify(|_, w| w.pwm().clear_bit());
        while !resets.reset_done.read().pwm().bit() {}

        let n = usize::from((TCK_PIN >> 1) & 7);
        let slice = (PWM::ptr() as usize + n * PWM_CH_STRIDE) as *mut u32;
        // Channel B is the odd pin and compares in the high half of CC.
        let cc = if TCK_PIN & 1 == 0 {
            TEST_CLOCK_CC
        } else {
            TEST_CLOCK_CC << 16
        };
        unsafe {
            reg(slice, PWM_CSR).write_volatile(0);
            reg(slice, PWM_DIV).write_volatile(PWM_DIV_ONE);
            reg(slice, PWM_TOP).write_volatile(TEST_CLOCK_TOP);
            reg(slice, PWM_CC).write_volatile(cc);
        }
        Self { slice }
    }
}

unsafe fn reg(slice: *mut u32, offset: usize) -> *mut u32 {
    slice.add(offset / 4)
}

impl TestClock for PwmTestClock {
    fn start(&mut self) {
        unsafe { reg(self.slice, PWM_CSR).write_volatile(PWM_CSR_EN) };
        set_function(TCK_PIN, Function::Pwm);
    }

    fn stop(&mut self) {
        write_pin(TCK_PIN, false);
        set_function(TCK_PIN, Function::Sio);
        unsafe { reg(self.slice, PWM_CSR).write_volatile(0) };
    }
}
