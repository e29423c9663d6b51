// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot ROM services: the reboot into the USB mass-storage bootloader, and
//! the external flash's unique ID, which the serial number is made from.
//!
//! ROM functions are found through the lookup table at the bottom of the
//! ROM (datasheet 2.8.3), keyed by two ASCII characters.

use core::ptr::read_volatile;

/// Halfword pointer to the public function table.
const ROM_FUNC_TABLE: *const u16 = 0x0000_0014 as *const u16;
/// Halfword pointer to `rom_table_lookup`.
const ROM_TABLE_LOOKUP: *const u16 = 0x0000_0018 as *const u16;

type RomTableLookup = unsafe extern "C" fn(table: *const u16, code: u32) -> usize;
type RomVoidFn = unsafe extern "C" fn();
type ResetToUsbBoot = unsafe extern "C" fn(gpio_activity_pin_mask: u32, disable_interface_mask: u32);

const fn rom_code(tag: [u8; 2]) -> u32 {
    (tag[1] as u32) << 8 | tag[0] as u32
}

/// Address of the ROM function tagged `tag`, or 0 if there isn't one.
unsafe fn rom_func(tag: [u8; 2]) -> usize {
    let lookup = read_volatile(ROM_TABLE_LOOKUP) as usize;
    let table = read_volatile(ROM_FUNC_TABLE) as usize as *const u16;
    let lookup: RomTableLookup = core::mem::transmute(lookup);
    lookup(table, rom_code(tag))
}

unsafe fn rom_void_fn(tag: [u8; 2]) -> Option<RomVoidFn> {
    match rom_func(tag) {
        0 => None,
        f => Some(core::mem::transmute::<usize, RomVoidFn>(f)),
    }
}

/// Reboots into the ROM's USB bootloader (UF2 drive plus PICOBOOT), with no
/// activity LED and both interfaces enabled. Does not return.
pub fn reset_to_usb_boot() -> ! {
    cortex_m::interrupt::disable();
    unsafe {
        match rom_func(*b"UB") {
            0 => {}
            f => {
                let f: ResetToUsbBoot = core::mem::transmute(f);
                f(0, 0);
            }
        }
    }
    // Only reachable on a ROM without the entry point.
    cortex_m::peripheral::SCB::sys_reset()
}

const SSI_BASE: usize = 0x1800_0000;
const SSI_SR: usize = SSI_BASE + 0x28;
const SSI_DR0: usize = SSI_BASE + 0x60;
const SSI_SR_TFNF: u32 = 1 << 1;
const SSI_SR_RFNE: u32 = 1 << 3;

/// IO_QSPI GPIO_QSPI_SS_CTRL.
const QSPI_SS_CTRL: usize = 0x4001_800c;
const QSPI_SS_OUTOVER_MASK: u32 = 0b11 << 8;
const QSPI_SS_OUTOVER_LOW: u32 = 0b10 << 8;
const QSPI_SS_OUTOVER_HIGH: u32 = 0b11 << 8;

/// Winbond-style "read unique ID": opcode, four dummy bytes, eight ID bytes.
const FLASH_RUID_CMD: u32 = 0x4b;
const FLASH_RUID_DUMMY: usize = 4;
const FLASH_RUID_LEN: usize = 8;

const XIP_BASE: usize = 0x1000_0000;
const BOOT2_WORDS: usize = 64;

struct FlashRom {
    connect_internal_flash: RomVoidFn,
    flash_exit_xip: RomVoidFn,
    flash_flush_cache: RomVoidFn,
}

/// Reads the flash chip's 64-bit unique ID. Returns `None` if the ROM lacks
/// the flash helpers.
///
/// XIP is off while this runs, so the part that talks to the flash is in
/// RAM, interrupts are masked, and XIP is brought back by re-running a RAM
/// copy of the second stage bootloader.
pub fn flash_unique_id() -> Option<[u8; FLASH_RUID_LEN]> {
    let rom = unsafe {
        FlashRom {
            connect_internal_flash: rom_void_fn(*b"IF")?,
            flash_exit_xip: rom_void_fn(*b"EX")?,
            flash_flush_cache: rom_void_fn(*b"FC")?,
        }
    };

    let mut boot2 = [0u32; BOOT2_WORDS];
    for (i, w) in boot2.iter_mut().enumerate() {
        *w = unsafe { read_volatile((XIP_BASE as *const u32).add(i)) };
    }

    let mut uid = [0; FLASH_RUID_LEN];
    cortex_m::interrupt::free(|_| unsafe {
        read_unique_id_from_ram(&rom, boot2.as_ptr(), &mut uid);
    });
    Some(uid)
}

/// Everything between leaving XIP and re-entering it has to run from RAM,
/// including every instruction this calls. Only ROM functions and the
/// `#[inline(always)]` helpers below are allowed; no iterators, slice
/// methods or `core::ptr` functions, which a debug build leaves in flash.
#[inline(never)]
#[link_section = ".data.ram_func"]
unsafe fn read_unique_id_from_ram(rom: &FlashRom, boot2: *const u32, uid: &mut [u8; FLASH_RUID_LEN]) {
    (rom.connect_internal_flash)();
    (rom.flash_exit_xip)();

    let uid_base = uid as *mut [u8; FLASH_RUID_LEN] as usize;
    set_flash_cs(false);
    let mut i = 0;
    while i < 1 + FLASH_RUID_DUMMY + FLASH_RUID_LEN {
        let tx = if i == 0 { FLASH_RUID_CMD } else { 0 };
        while mmio_read(SSI_SR) & SSI_SR_TFNF == 0 {}
        mmio_write(SSI_DR0, tx);
        while mmio_read(SSI_SR) & SSI_SR_RFNE == 0 {}
        let rx = mmio_read(SSI_DR0) as u8;
        if i >= 1 + FLASH_RUID_DUMMY {
            *((uid_base + i - 1 - FLASH_RUID_DUMMY) as *mut u8) = rx;
        }
        i += 1;
    }
    set_flash_cs(true);

    (rom.flash_flush_cache)();
    // Thumb entry point of the copied boot2.
    let enter_xip: RomVoidFn = core::mem::transmute(boot2 as usize + 1);
    enter_xip();
}

#[inline(always)]
unsafe fn set_flash_cs(high: bool) {
    let v = mmio_read(QSPI_SS_CTRL) & !QSPI_SS_OUTOVER_MASK;
    let over = if high { QSPI_SS_OUTOVER_HIGH } else { QSPI_SS_OUTOVER_LOW };
    mmio_write(QSPI_SS_CTRL, v | over);
}

/// Single `ldr`, so it can't turn into a call.
#[inline(always)]
unsafe fn mmio_read(addr: usize) -> u32 {
    let v: u32;
    core::arch::asm!("ldr {v}, [{a}]", a = in(reg) addr, v = out(reg) v, options(nostack, preserves_flags));
    v
}

/// Single `str`, so it can't turn into a call.
#[inline(always)]
unsafe fn mmio_write(addr: usize, v: u32) {
    core::arch::asm!("str {v}, [{a}]", a = in(reg) addr, v = in(reg) v, options(nostack, preserves_flags));
}
