// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity: descriptors, EEPROM image, and serial number.
//!
//! Everything here impersonates a dual-channel FT2232-family part closely
//! enough that the stock FTDI drivers bind to us: the VID/PID pair, the
//! `bcdDevice` of 5.00 that selects the "2232C/D" code path, two vendor-class
//! interfaces each with a bulk pair, and an EEPROM that reads back a plausible
//! identity.

use byteorder::LittleEndian;
use zerocopy::{AsBytes, U16};

use crate::error::{Error, Result};
use crate::usb::{
    UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor, UsbDir,
    UsbEndpointDescriptor, UsbInterfaceDescriptor, UsbTransferType,
};

/// Max packet size of EP0.
pub const EP0_PACKET_SIZE: u8 = 64;
/// Max packet size of every bulk endpoint.
pub const BULK_PACKET_SIZE: usize = 64;

// Channel A (interface 0) is MPSSE, channel B (interface 1) is the UART.
pub const JTAG_IN_ADDR: u8 = UsbDir::In.endpoint(1);
pub const JTAG_OUT_ADDR: u8 = UsbDir::Out.endpoint(2);
pub const UART_IN_ADDR: u8 = UsbDir::In.endpoint(3);
pub const UART_OUT_ADDR: u8 = UsbDir::Out.endpoint(4);

/// Every non-control endpoint, in halt-bit order.
pub const BULK_ENDPOINTS: [u8; 4] = [JTAG_IN_ADDR, JTAG_OUT_ADDR, UART_IN_ADDR, UART_OUT_ADDR];

/// Bit in the endpoint halt mask for `addr`, if `addr` is one of ours.
pub fn halt_bit(addr: u8) -> Option<u8> {
    BULK_ENDPOINTS
        .iter()
        .position(|&a| a == addr)
        .map(|i| 1 << i)
}

pub static DEVICE_DESCRIPTOR: UsbDeviceDescriptor = UsbDeviceDescriptor {
    length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
    descriptor_type: UsbDescType::Device,
    bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0200)),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_PACKET_SIZE,
    vendor: U16::from_bytes(u16::to_le_bytes(0x0403)),
    product: U16::from_bytes(u16::to_le_bytes(0x6010)),
    bcd_device: U16::from_bytes(u16::to_le_bytes(0x0500)),
    manufacturer_s: 1,
    product_s: 2,
    serial_s: 3,
    num_configurations: 1,
};

/// The configuration descriptor followed by everything it owns, laid out
/// exactly as GET_DESCRIPTOR(Config) returns it.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct ConfigurationBundle {
    pub config: UsbConfigurationDescriptor,
    pub jtag_interface: UsbInterfaceDescriptor,
    pub jtag_in: UsbEndpointDescriptor,
    pub jtag_out: UsbEndpointDescriptor,
    pub uart_interface: UsbInterfaceDescriptor,
    pub uart_in: UsbEndpointDescriptor,
    pub uart_out: UsbEndpointDescriptor,
}

/// Value the host passes to SET_CONFIGURATION to select our one
/// configuration.
pub const CONFIGURATION_VALUE: u8 = 1;

const fn vendor_interface(number: u8, name: u8) -> UsbInterfaceDescriptor {
    UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: number,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: 0xff,
        interface_subclass: 0xff,
        interface_protocol: 0xff,
        interface_s: name,
    }
}

const fn bulk_endpoint(address: u8) -> UsbEndpointDescriptor {
    UsbEndpointDescriptor {
        length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
        descriptor_type: UsbDescType::Endpoint,
        endpoint_address: address,
        attributes: UsbTransferType::Bulk as u8,
        max_packet_size: U16::from_bytes(u16::to_le_bytes(BULK_PACKET_SIZE as u16)),
        interval: 0,
    }
}

pub static CONFIGURATION: ConfigurationBundle = ConfigurationBundle {
    config: UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: U16::from_bytes(u16::to_le_bytes(
            core::mem::size_of::<ConfigurationBundle>() as u16,
        )),
        num_interfaces: 2,
        configuration_value: CONFIGURATION_VALUE,
        configuration_s: 0,
        attributes: 0x80,
        max_power: 0x32,
    },
    jtag_interface: vendor_interface(0, 4),
    jtag_in: bulk_endpoint(JTAG_IN_ADDR),
    jtag_out: bulk_endpoint(JTAG_OUT_ADDR),
    uart_interface: vendor_interface(1, 0),
    uart_in: bulk_endpoint(UART_IN_ADDR),
    uart_out: bulk_endpoint(UART_OUT_ADDR),
};

/// Builds a string descriptor from ASCII text at compile time. `N` must be
/// exactly `2 + 2 * text.len()`.
const fn string_descriptor<const N: usize>(text: &str) -> [u8; N] {
    let bytes = text.as_bytes();
    assert!(N == 2 + 2 * bytes.len());
    let mut out = [0; N];
    out[0] = N as u8;
    out[1] = UsbDescType::String as u8;
    let mut i = 0;
    while i < bytes.len() {
        out[2 + 2 * i] = bytes[i];
        i += 1;
    }
    out
}

/// String index 0: we speak US English only.
pub static LANGUAGES: [u8; 4] = [4, UsbDescType::String as u8, 0x09, 0x04];
pub static MANUFACTURER: [u8; 28] = string_descriptor("Kongou Hikari");
pub static PRODUCT: [u8; 26] = string_descriptor("Sipeed-Debug");
pub static JTAG_INTERFACE: [u8; 24] = string_descriptor("Sipeed-JTAG");

/// Where the bytes of a GET_DESCRIPTOR response come from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    Table(&'static [u8]),
    /// Generated on the fly by `SerialNumber`.
    Serial,
}

/// Resolves the `wValue` of a GET_DESCRIPTOR request.
///
/// Any string index we don't otherwise recognize answers with the serial
/// number; hosts only ever ask for the indices our descriptors name, so in
/// practice that's index 3.
pub fn lookup(descriptor_type: u8, index: u8) -> Result<Descriptor> {
    match num_traits::FromPrimitive::from_u8(descriptor_type) {
        Some(UsbDescType::Device) => Ok(Descriptor::Table(DEVICE_DESCRIPTOR.as_bytes())),
        Some(UsbDescType::Config) => Ok(Descriptor::Table(CONFIGURATION.as_bytes())),
        Some(UsbDescType::String) => Ok(match index {
            0 => Descriptor::Table(&LANGUAGES),
            1 => Descriptor::Table(&MANUFACTURER),
            2 => Descriptor::Table(&PRODUCT),
            4 => Descriptor::Table(&JTAG_INTERFACE),
            _ => Descriptor::Serial,
        }),
        // Full-speed only, so no qualifier; interface and endpoint
        // descriptors only travel inside the configuration bundle.
        _ => Err(Error::UnsupportedDescriptor {
            descriptor_type,
            index,
        }),
    }
}

/// Length of the generated serial-number string descriptor: header plus ten
/// UTF-16 characters.
pub const SERIAL_DESCRIPTOR_LEN: usize = 22;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Serial number derived from five bytes of per-device unique ID, rendered as
/// ten upper-case hex digits, high nibble first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SerialNumber {
    uid: [u8; 5],
}

impl SerialNumber {
    pub const fn new(uid: [u8; 5]) -> Self {
        Self { uid }
    }

    /// Byte `i` of the descriptor. Computed rather than stored so that a
    /// multi-packet transfer can resume at any offset.
    pub fn byte_at(&self, i: usize) -> u8 {
        match i {
            0 => SERIAL_DESCRIPTOR_LEN as u8,
            1 => UsbDescType::String as u8,
            _ if i >= SERIAL_DESCRIPTOR_LEN || i & 1 == 1 => 0,
            _ => {
                let digit = (i - 2) / 2;
                let byte = self.uid[digit / 2];
                let nibble = if digit & 1 == 0 { byte >> 4 } else { byte & 0xf };
                HEX_DIGITS[usize::from(nibble)]
            }
        }
    }

    /// Copies descriptor bytes starting at `offset` into `out`, returning how
    /// many were written.
    pub fn copy_into(&self, offset: usize, out: &mut [u8]) -> usize {
        let n = SERIAL_DESCRIPTOR_LEN.saturating_sub(offset).min(out.len());
        for (i, b) in out[..n].iter_mut().enumerate() {
            *b = self.byte_at(offset + i);
        }
        n
    }
}

/// Simulated 93C46-style EEPROM contents, 64 little-endian words. Host tools
/// read this to learn the chip type, the power budget, and the USB strings.
pub static EEPROM: [u16; 64] = [
    0x0800, 0x0403, 0x6010, 0x0500, 0x3280, 0x0000, 0x0200, 0x1096,
    0x1aa6, 0x0000, 0x0046, 0x0310, 0x004f, 0x0070, 0x0065, 0x006e,
    0x002d, 0x0045, 0x0043, 0x031a, 0x0055, 0x0053, 0x0042, 0x0020,
    0x0044, 0x0065, 0x0062, 0x0075, 0x0067, 0x0067, 0x0065, 0x0072,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x1027,
];

/// EEPROM word at `index`, wrapping at the 64-word size of the part.
pub fn eeprom_word(index: u16) -> u16 {
    EEPROM[usize::from(index & 0x3f)]
}
