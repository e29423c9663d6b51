// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USBCTRL in device mode.
//!
//! The controller's dual-port RAM holds the SETUP packet, one control and
//! one buffer control register per endpoint direction, and the packet
//! buffers. We single-buffer everything: EP0 uses the fixed buffer at
//! `EP0_BUFFER` for both directions (control transfers are half-duplex), and
//! each bulk endpoint gets its own 64-byte slot after that.
//!
//! `UsbBus` is a copyable view of the registers. The interrupt handler holds
//! one wrapped in `UsbDevice`, which also owns the control dispatcher; the
//! main loop holds another for the bulk pipes. Buffer control writes from
//! the main loop happen inside a critical section so that they can't
//! interleave with the interrupt handler's writes to the same endpoint.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::interrupt::Mutex;
use rp2040_pac::{RESETS, USBCTRL_DPRAM, USBCTRL_REGS};

use rp2040_ftdi::control::{ControlDispatcher, ControlEndpoint};
use rp2040_ftdi::descriptors::{
    halt_bit, BULK_PACKET_SIZE, JTAG_IN_ADDR, JTAG_OUT_ADDR, UART_IN_ADDR, UART_OUT_ADDR,
};
use rp2040_ftdi::ftdi::Channel;
use rp2040_ftdi::pipe::BulkEndpoints;
use rp2040_ftdi::state::Shared;
use rp2040_ftdi::usb::{UsbDir, UsbTransferType};

type Regs = rp2040_pac::usbctrl_regs::RegisterBlock;
type Dpram = rp2040_pac::usbctrl_dpram::RegisterBlock;

/// Offset of the EP0 buffer within DPRAM.
const EP0_BUFFER: u16 = 0x100;
/// Offset of the first freely allocatable buffer.
const BULK_BUFFER_BASE: u16 = 0x180;

/// Buffer control indices of EP0; `2n + out` in general.
const EP0_IN_BC: usize = 0;
const EP0_OUT_BC: usize = 1;

/// `buff_status` bits: `2n` for EPn IN, `2n + 1` for EPn OUT.
const EP0_IN_DONE: u32 = 1 << 0;
const EP0_OUT_DONE: u32 = 1 << 1;

/// Highest buffer control index we use, plus one.
const BC_COUNT: usize = 10;

/// Where one bulk endpoint lives in DPRAM.
#[derive(Copy, Clone, Debug)]
struct EndpointSlot {
    addr: u8,
    /// Index into `ep_control` (EP0 has none).
    control: usize,
    /// Index into `ep_buffer_control`.
    buffer_control: usize,
    /// Data buffer offset from the DPRAM base.
    buffer: u16,
}

impl EndpointSlot {
    const fn new(addr: u8, slot: u16) -> Self {
        let n = (addr & 0x0f) as usize;
        let out = (addr & 0x80 == 0) as usize;
        Self {
            addr,
            control: 2 * (n - 1) + out,
            buffer_control: 2 * n + out,
            buffer: BULK_BUFFER_BASE + slot * BULK_PACKET_SIZE as u16,
        }
    }

    fn is_out(&self) -> bool {
        UsbDir::of_endpoint_addr(self.addr) == UsbDir::Out
    }

    fn done_bit(&self) -> u32 {
        1 << self.buffer_control
    }

    fn channel(&self) -> Channel {
        match self.addr {
            JTAG_IN_ADDR | JTAG_OUT_ADDR => Channel::Jtag,
            _ => Channel::Uart,
        }
    }
}

static SLOTS: [EndpointSlot; 4] = [
    EndpointSlot::new(JTAG_IN_ADDR, 0),
    EndpointSlot::new(JTAG_OUT_ADDR, 1),
    EndpointSlot::new(UART_IN_ADDR, 2),
    EndpointSlot::new(UART_OUT_ADDR, 3),
];

fn slot_for(addr: u8) -> Option<&'static EndpointSlot> {
    SLOTS.iter().find(|s| s.addr == addr)
}

fn in_slot(channel: Channel) -> &'static EndpointSlot {
    &SLOTS[2 * channel.index()]
}

fn out_slot(channel: Channel) -> &'static EndpointSlot {
    &SLOTS[2 * channel.index() + 1]
}

/// DATA0/DATA1 expected next, per buffer control index. `true` is DATA1.
static NEXT_PID: [AtomicBool; BC_COUNT] = {
    const DATA0: AtomicBool = AtomicBool::new(false);
    [DATA0; BC_COUNT]
};

#[derive(Copy, Clone)]
pub struct UsbBus {
    shared: &'static Shared,
}

impl UsbBus {
    /// Resets and configures the controller, leaving the pull-up off. The
    /// PAC singletons are consumed; from here on access goes through the
    /// returned (copyable) handle.
    pub fn init(
        resets: &RESETS,
        regs: USBCTRL_REGS,
        dpram: USBCTRL_DPRAM,
        shared: &'static Shared,
    ) -> Self {
        drop((regs, dpram));
        let bus = Self { shared };
        let regs = bus.regs();

        resets.reset.modify(|_, w| w.usbctrl().set_bit());
        resets.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !resets.reset_done.read().usbctrl().bit() {}

        bus.dpram().setup_packet_low.write(|w| unsafe { w.bits(0) });
        bus.dpram().setup_packet_high.write(|w| unsafe { w.bits(0) });
        for epc in &bus.dpram().ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &bus.dpram().ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        regs.usb_muxing
            .write(|w| w.to_phy().set_bit().softcon().set_bit());
        // Not every board routes VBUS to the detect pin.
        regs.usb_pwr.write(|w| {
            w.vbus_detect()
                .set_bit()
                .vbus_detect_override_en()
                .set_bit()
        });
        regs.main_ctrl
            .write(|w| w.controller_en().set_bit().host_ndevice().clear_bit());
        regs.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit());
        regs.inte.write(|w| {
            w.buff_status()
                .set_bit()
                .bus_reset()
                .set_bit()
                .setup_req()
                .set_bit()
                .dev_suspend()
                .set_bit()
                .dev_resume_from_host()
                .set_bit()
        });

        for slot in &SLOTS {
            bus.dpram().ep_control[slot.control].write(|w| unsafe {
                w.enable()
                    .set_bit()
                    .interrupt_per_buff()
                    .set_bit()
                    .endpoint_type()
                    .bits(UsbTransferType::Bulk as u8)
                    .buffer_address()
                    .bits(slot.buffer)
            });
        }

        bus
    }

    fn regs(&self) -> &'static Regs {
        unsafe { &*USBCTRL_REGS::ptr() }
    }

    fn dpram(&self) -> &'static Dpram {
        unsafe { &*USBCTRL_DPRAM::ptr() }
    }

    /// Pull-up on: the host sees us from here.
    pub fn connect(&self) {
        self.regs().sie_ctrl.modify(|_, w| w.pullup_en().set_bit());
    }

    fn buffer_ptr(&self, offset: u16) -> *mut u8 {
        (USBCTRL_DPRAM::ptr() as usize + usize::from(offset)) as *mut u8
    }

    fn stall_requested(&self, bc: usize) -> bool {
        SLOTS
            .iter()
            .find(|s| s.buffer_control == bc)
            .and_then(|s| halt_bit(s.addr))
            .map_or(false, |bit| self.shared.config.is_halted(bit))
    }

    /// Copies `data` into the buffer at `offset` and hands it to the
    /// controller to send on the next IN.
    fn start_tx(&self, bc: usize, offset: u16, data: &[u8]) {
        let len = data.len().min(BULK_PACKET_SIZE);
        // Safety: the buffer belongs to this endpoint alone, and the
        // controller doesn't read it until AVAILABLE is set below.
        unsafe {
            self.buffer_ptr(offset)
                .copy_from_nonoverlapping(data.as_ptr(), len);
        }
        let pid = NEXT_PID[bc].load(Ordering::Relaxed);
        let stall = self.stall_requested(bc);
        self.dpram().ep_buffer_control[bc].write(|w| unsafe {
            w.pid_0()
                .bit(pid)
                .full_0()
                .set_bit()
                .available_0()
                .set_bit()
                .stall()
                .bit(stall)
                .length_0()
                .bits(len as u16)
        });
        NEXT_PID[bc].store(!pid, Ordering::Relaxed);
    }

    /// Lets the controller accept up to `len` bytes on the next OUT.
    fn start_rx(&self, bc: usize, len: usize) {
        let pid = NEXT_PID[bc].load(Ordering::Relaxed);
        let stall = self.stall_requested(bc);
        self.dpram().ep_buffer_control[bc].write(|w| unsafe {
            w.pid_0()
                .bit(pid)
                .full_0()
                .clear_bit()
                .available_0()
                .set_bit()
                .stall()
                .bit(stall)
                .length_0()
                .bits(len as u16)
        });
        NEXT_PID[bc].store(!pid, Ordering::Relaxed);
    }

    fn received_len(&self, bc: usize) -> usize {
        usize::from(self.dpram().ep_buffer_control[bc].read().length_0().bits())
    }

    fn setup_packet(&self) -> [u8; 8] {
        let mut packet = [0; 8];
        packet[..4].copy_from_slice(&self.dpram().setup_packet_low.read().bits().to_le_bytes());
        packet[4..].copy_from_slice(&self.dpram().setup_packet_high.read().bits().to_le_bytes());
        packet
    }

    /// Every bulk buffer back to unarmed, every toggle back to DATA0.
    fn reset_bulk(&self) {
        for slot in &SLOTS {
            NEXT_PID[slot.buffer_control].store(false, Ordering::Relaxed);
            self.dpram().ep_buffer_control[slot.buffer_control].write(|w| unsafe { w.bits(0) });
        }
    }
}

impl ControlEndpoint for UsbBus {
    fn write_in(&mut self, data: &[u8]) {
        self.start_tx(EP0_IN_BC, EP0_BUFFER, data);
    }

    fn expect_out(&mut self) {
        self.start_rx(EP0_OUT_BC, BULK_PACKET_SIZE);
    }

    fn stall(&mut self) {
        self.regs()
            .ep_stall_arm
            .write(|w| w.ep0_in().set_bit().ep0_out().set_bit());
        for bc in [EP0_IN_BC, EP0_OUT_BC] {
            self.dpram().ep_buffer_control[bc].write(|w| w.stall().set_bit());
        }
    }

    fn set_address(&mut self, address: u8) {
        self.regs()
            .addr_endp
            .write(|w| unsafe { w.address().bits(address) });
    }

    fn set_endpoint_halt(&mut self, endpoint: u8, halted: bool) {
        let slot = match slot_for(endpoint) {
            Some(s) => s,
            None => return,
        };
        let bc = &self.dpram().ep_buffer_control[slot.buffer_control];
        if halted {
            bc.modify(|_, w| w.stall().set_bit());
            return;
        }
        NEXT_PID[slot.buffer_control].store(false, Ordering::Relaxed);
        if slot.is_out() && bc.read().available_0().bit() {
            // Was waiting for the host: stay armed, from DATA0.
            self.start_rx(slot.buffer_control, BULK_PACKET_SIZE);
        } else {
            bc.write(|w| unsafe { w.bits(0) });
        }
    }
}

impl BulkEndpoints for UsbBus {
    fn read_out(&mut self, channel: Channel, out: &mut [u8]) -> usize {
        let slot = out_slot(channel);
        let len = out.len().min(BULK_PACKET_SIZE);
        // Safety: the pipe only reads after the completion was reported and
        // before re-arming, so the controller isn't writing this buffer.
        unsafe {
            out.as_mut_ptr()
                .copy_from_nonoverlapping(self.buffer_ptr(slot.buffer), len);
        }
        len
    }

    fn arm_out(&mut self, channel: Channel) {
        let slot = out_slot(channel);
        cortex_m::interrupt::free(|_| self.start_rx(slot.buffer_control, BULK_PACKET_SIZE));
    }

    fn write_in(&mut self, channel: Channel, data: &[u8]) {
        let slot = in_slot(channel);
        cortex_m::interrupt::free(|_| self.start_tx(slot.buffer_control, slot.buffer, data));
    }
}

/// Interrupt-side device: the register view plus the EP0 state machine.
struct UsbDevice {
    bus: UsbBus,
    control: ControlDispatcher<'static>,
}

static USB_DEVICE: Mutex<RefCell<Option<UsbDevice>>> = Mutex::new(RefCell::new(None));

/// Hands the interrupt its device. Call before unmasking USBCTRL_IRQ.
pub fn install(bus: UsbBus, control: ControlDispatcher<'static>) {
    cortex_m::interrupt::free(|cs| {
        USB_DEVICE
            .borrow(cs)
            .replace(Some(UsbDevice { bus, control }));
    });
}

/// USBCTRL_IRQ body.
pub fn service_irq() {
    cortex_m::interrupt::free(|cs| {
        if let Some(dev) = USB_DEVICE.borrow(cs).borrow_mut().as_mut() {
            dev.service();
        }
    });
}

impl UsbDevice {
    /// Handles everything pending in `ints`.
    fn service(&mut self) {
        let regs = self.bus.regs();
        let shared = self.bus.shared;
        let ints = regs.ints.read();

        if ints.setup_req().bit() {
            regs.sie_status.write(|w| w.setup_rec().set_bit());
            let packet = self.bus.setup_packet();
            // Data and status stages of a control transfer start at DATA1.
            NEXT_PID[EP0_IN_BC].store(true, Ordering::Relaxed);
            NEXT_PID[EP0_OUT_BC].store(true, Ordering::Relaxed);
            self.control.setup(&packet, &mut self.bus);
        }

        if ints.buff_status().bit() {
            let done = regs.buff_status.read().bits();
            if done & EP0_IN_DONE != 0 {
                self.control.in_complete(&mut self.bus);
            }
            if done & EP0_OUT_DONE != 0 {
                let len = self.bus.received_len(EP0_OUT_BC);
                self.control.out_complete(len, &mut self.bus);
            }
            for slot in SLOTS.iter().filter(|s| done & s.done_bit() != 0) {
                let signals = shared.pipe(slot.channel());
                if slot.is_out() {
                    signals.out_complete(self.bus.received_len(slot.buffer_control) as u8);
                } else {
                    signals.in_complete();
                }
            }
            regs.buff_status.write(|w| unsafe { w.bits(done) });
        }

        if ints.bus_reset().bit() {
            regs.sie_status.write(|w| w.bus_reset().set_bit());
            self.bus.reset_bulk();
            self.control.bus_reset(&mut self.bus);
        }

        if ints.dev_suspend().bit() {
            regs.sie_status.write(|w| w.suspended().set_bit());
            log::debug!("suspend");
        }

        if ints.dev_resume_from_host().bit() {
            regs.sie_status.write(|w| w.resume().set_bit());
            log::debug!("resume");
        }
    }
}
