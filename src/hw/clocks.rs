// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clock tree bring-up and the 1 ms tick.
//!
//! From reset we're on the ring oscillator at a few MHz. This moves ref/sys
//! onto the 12 MHz crystal, runs the CPU (and clk_peri, which feeds UART and
//! SPI) from PLL_SYS at 132 MHz, and gives USB its 48 MHz from PLL_USB.

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;
use rp2040_pac::{CLOCKS, PLL_SYS, PLL_USB, RESETS, ROSC, XOSC};

pub const SYS_CLOCK_HZ: u32 = 132_000_000;
/// clk_peri tracks clk_sys.
pub const PERI_CLOCK_HZ: u32 = SYS_CLOCK_HZ;

pub const TICK_HZ: u32 = 1_000;

/// XOSC_CTRL: 1-15 MHz range, enabled.
const XOSC_ENABLE_1_15MHZ: u32 = 0xfab_aa0;
/// ROSC_CTRL: disabled.
const ROSC_DISABLE: u32 = 0xd1e_fa4;

/// One PLL's divider settings. Output is
/// `12 MHz / refdiv * fbdiv / (postdiv1 * postdiv2)`.
struct PllSettings {
    refdiv: u8,
    fbdiv: u16,
    postdiv1: u8,
    postdiv2: u8,
}

/// 1584 MHz VCO / 12.
const PLL_SYS_132MHZ: PllSettings = PllSettings {
    refdiv: 1,
    fbdiv: 132,
    postdiv1: 6,
    postdiv2: 2,
};

/// 1200 MHz VCO / 25.
const PLL_USB_48MHZ: PllSettings = PllSettings {
    refdiv: 1,
    fbdiv: 100,
    postdiv1: 5,
    postdiv2: 5,
};

pub fn init(
    resets: &RESETS,
    xosc: &XOSC,
    rosc: &ROSC,
    clocks: &CLOCKS,
    pll_sys: &PLL_SYS,
    pll_usb: &PLL_USB,
) {
    xosc.ctrl.write(|w| unsafe { w.bits(XOSC_ENABLE_1_15MHZ) });
    while !xosc.status.read().stable().bit() {}

    // clk_ref and (by default) clk_sys follow it glitchlessly.
    clocks.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while clocks.clk_ref_selected.read().bits() != (1 << 2) {}
    rosc.ctrl.write(|w| unsafe { w.bits(ROSC_DISABLE) });

    resets.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !resets.reset_done.read().pll_sys().bit() {}
    start_pll(pll_sys, &PLL_SYS_132MHZ);

    clocks.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    clocks
        .clk_sys_ctrl
        .modify(|_, w| w.src().clksrc_clk_sys_aux());
    while clocks.clk_sys_selected.read().bits() != (1 << 1) {}

    clocks
        .clk_peri_ctrl
        .write(|w| w.auxsrc().clk_sys().enable().set_bit());

    resets.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !resets.reset_done.read().pll_usb().bit() {}
    start_pll(pll_usb, &PLL_USB_48MHZ);

    clocks
        .clk_usb_ctrl
        .write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());
}

/// PLL_SYS and PLL_USB share a register layout; the PAC hands out the same
/// block type for both.
fn start_pll(pll: &rp2040_pac::pll_sys::RegisterBlock, s: &PllSettings) {
    pll.cs.write(|w| unsafe { w.refdiv().bits(s.refdiv) });
    pll.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(s.fbdiv) });
    pll.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !pll.cs.read().lock().bit() {}
    pll.prim
        .write(|w| unsafe { w.postdiv1().bits(s.postdiv1).postdiv2().bits(s.postdiv2) });
    pll.pwr.modify(|_, w| w.postdivpd().clear_bit());
}

/// Starts SysTick firing every millisecond off the core clock.
pub fn start_tick(syst: &mut SYST) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYS_CLOCK_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}
