// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB structure and constant definitions.
//!
//! These are the on-the-wire layouts from chapter 9 of USB 2.0,
//! expressed as `zerocopy` types so that a SETUP packet can be reinterpreted
//! in place and a descriptor can be sent with `as_bytes()`.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U16};

use crate::error::{Error, Result};

/// Transfer direction, as it appears in bit 7 of endpoint addresses and
/// `bmRequestType`. IN is device-to-host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    /// Produces the endpoint address for endpoint `num` in this direction.
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    /// Extracts the direction bit from an endpoint address or from a
    /// `bmRequestType` byte; both keep it in bit 7.
    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Type bits (6:5) of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Recipient bits (4:0) of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// The eight bytes of a SETUP packet.
#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// Request type: direction in bit 7, kind in bits 6:5, recipient in the
    /// bottom five bits.
    pub request_type: u8,
    /// Request. Standard setup requests are in the `UsbSetupRequest` enum,
    /// FTDI vendor requests in `ftdi::FtdiRequest`.
    pub request: u8,
    /// First argument; what it means depends on `request`.
    pub value: U16<LittleEndian>,
    /// Second argument. Endpoint address for endpoint requests, channel
    /// number for FTDI vendor requests.
    pub index: U16<LittleEndian>,
    /// Data stage size: exact for OUT, an upper bound for IN. Zero means no
    /// data stage.
    pub length: U16<LittleEndian>,
}

impl UsbSetupPacket {
    /// Reinterprets the bytes read out of the SETUP buffer. Anything other
    /// than exactly 8 bytes is malformed.
    pub fn parse(bytes: &[u8]) -> Result<&Self> {
        LayoutVerified::<_, UsbSetupPacket>::new_unaligned(bytes)
            .map(|lv| lv.into_ref())
            .ok_or(Error::MalformedSetup {
                length: bytes.len(),
            })
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    /// Recipient, or `None` for the reserved encodings.
    pub fn recipient(&self) -> Option<Recipient> {
        num_traits::FromPrimitive::from_u8(self.request_type & 0x1f)
    }

    pub fn value_low(&self) -> u8 {
        self.value.get() as u8
    }

    pub fn value_high(&self) -> u8 {
        (self.value.get() >> 8) as u8
    }

    pub fn index_low(&self) -> u8 {
        self.index.get() as u8
    }
}

/// The standard SETUP requests we understand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbSetupRequest {
    /// Reads the two status bytes of the device, an interface or an
    /// endpoint. Always an IN.
    GetStatus = 0x00,
    /// Clears a feature such as an endpoint halt. Always an OUT.
    ClearFeature = 0x01,
    /// Sets a feature such as an endpoint halt. Always an OUT.
    SetFeature = 0x03,
    /// New bus address, taking effect after the status stage.
    SetAddress = 0x05,
    /// Descriptor type in the high byte of `value`, index in the low byte.
    GetDescriptor = 0x06,
    /// Reads back the current configuration value. Always an IN.
    GetConfiguration = 0x08,
    /// Selects configuration `value`, or 0 to deconfigure.
    SetConfiguration = 0x09,
}

/// Feature selector for `ClearFeature`/`SetFeature` on an endpoint.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Device descriptor (18 bytes).
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    /// BCD.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// BCD. FTDI drivers key the chip variant off this.
    pub bcd_device: U16<LittleEndian>,
    /// String descriptor indices, 0 for none.
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Configuration descriptor (9 bytes). The interface and endpoint
/// descriptors follow it on the wire.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    /// This descriptor plus everything that follows it.
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// What SET_CONFIGURATION passes to select this one.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 is reserved-set, bit 6 self-powered, bit 5 remote wakeup.
    pub attributes: u8,
    /// In 2 mA steps.
    pub max_power: u8,
}

/// Interface descriptor (9 bytes).
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    /// We only have the one.
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// Endpoint descriptor (7 bytes).
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    /// Number in bits 3:0, `UsbDir` in bit 7.
    pub endpoint_address: u8,
    /// Transfer type in the bottom 2 bits, from `UsbTransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval, unused for bulk.
    pub interval: u8,
}

/// `bDescriptorType` values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
}

/// Endpoint transfer types, as used in `attributes` and in the RP2040's
/// endpoint control registers.
#[derive(Copy, Clone, Debug, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Bulk = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setup_fields() {
        // Vendor IN to the device: read EEPROM word 5, 2 bytes.
        let raw = [0xc0, 0x90, 0x00, 0x00, 0x05, 0x00, 0x02, 0x00];
        let setup = UsbSetupPacket::parse(&raw).unwrap();
        assert_eq!(setup.direction(), UsbDir::In);
        assert_eq!(setup.kind(), RequestKind::Vendor);
        assert_eq!(setup.recipient(), Some(Recipient::Device));
        assert_eq!(setup.request, 0x90);
        assert_eq!(setup.index.get(), 5);
        assert_eq!(setup.length.get(), 2);
    }

    #[test]
    fn test_parse_rejects_short_and_long_packets() {
        assert_eq!(
            UsbSetupPacket::parse(&[0; 7]).unwrap_err(),
            Error::MalformedSetup { length: 7 }
        );
        assert!(UsbSetupPacket::parse(&[0; 9]).is_err());
    }

    #[test]
    fn test_value_halves() {
        let raw = [0x80, 0x06, 0x03, 0x02, 0x00, 0x00, 0xff, 0x00];
        let setup = UsbSetupPacket::parse(&raw).unwrap();
        assert_eq!(setup.value_high(), UsbDescType::Config as u8);
        assert_eq!(setup.value_low(), 3);
    }

    #[test]
    fn test_request_kind_from_type_bits() {
        let kind = |request_type: u8| {
            let raw = [request_type, 0, 0, 0, 0, 0, 0, 0];
            UsbSetupPacket::parse(&raw).unwrap().kind()
        };
        assert_eq!(kind(0x80), RequestKind::Standard);
        assert_eq!(kind(0x21), RequestKind::Class);
        assert_eq!(kind(0x40), RequestKind::Vendor);
        assert_eq!(kind(0xe0), RequestKind::Reserved);
    }

    #[test]
    fn test_endpoint_address_direction() {
        assert_eq!(UsbDir::In.endpoint(3), 0x83);
        assert_eq!(UsbDir::of_endpoint_addr(0x02), UsbDir::Out);
    }
}
