// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint 0: the control transfer state machine, standard requests, and
//! the FTDI vendor requests.
//!
//! This runs entirely in the USB interrupt. It never touches bulk buffer
//! contents or MPSSE state; anything the main loop needs to act on goes
//! through `state::Shared` as a flag.
//!
//! A control transfer goes SETUP, then zero or more DATA packets, then a
//! zero-length STATUS packet in the opposite direction. For IN requests the
//! status OUT is armed together with the first data packet, so a host that
//! wants fewer bytes than we have can cut the data stage short at any point.

use core::sync::atomic::Ordering;

use num_traits::FromPrimitive;

use crate::descriptors::{
    self, Descriptor, SerialNumber, CONFIGURATION_VALUE, JTAG_IN_ADDR, JTAG_OUT_ADDR,
    SERIAL_DESCRIPTOR_LEN,
};
use crate::error::{Error, Result};
use crate::ftdi::{BaudSetting, Channel, FtdiRequest, ModemControl, MODEM_STATUS};
use crate::state::Shared;
use crate::uart;
use crate::usb::{
    Recipient, RequestKind, UsbDir, UsbSetupPacket, UsbSetupRequest,
    FEATURE_ENDPOINT_HALT,
};

/// Largest packet the dispatcher will ever hand to `write_in`.
const MAX_EP0_PACKET: usize = descriptors::EP0_PACKET_SIZE as usize;

/// The hardware side of endpoint 0, plus the few device-wide registers that
/// standard requests reach.
pub trait ControlEndpoint {
    /// Arms EP0 IN with one packet. `data` is at most one max packet.
    fn write_in(&mut self, data: &[u8]);
    /// Arms EP0 OUT for one packet (data or status).
    fn expect_out(&mut self);
    /// Stalls EP0 in both directions until the next SETUP.
    fn stall(&mut self);
    fn set_address(&mut self, address: u8);
    /// Stalls or releases a bulk endpoint. Either way its data toggle goes
    /// back to DATA0 and any packet armed on an IN endpoint is dropped.
    fn set_endpoint_halt(&mut self, endpoint: u8, halted: bool);
}

/// Where the bytes of a data stage come from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    Table(&'static [u8]),
    Serial,
    Inline([u8; 2]),
}

impl Source {
    fn copy_into(&self, serial: &SerialNumber, offset: usize, out: &mut [u8]) -> usize {
        let table: &[u8] = match self {
            Source::Table(t) => *t,
            Source::Inline(b) => &b[..],
            Source::Serial => return serial.copy_into(offset, out),
        };
        let src = table.get(offset..).unwrap_or(&[]);
        let n = src.len().min(out.len());
        out[..n].copy_from_slice(&src[..n]);
        n
    }
}

/// What a successfully decoded request wants to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reply {
    /// No data stage; just acknowledge.
    Ack,
    /// IN data stage of up to this many bytes from `Source`.
    Data(Source, usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    DataIn {
        source: Source,
        offset: usize,
        remaining: usize,
        /// A zero-length packet is still owed to mark the end.
        zlp: bool,
    },
    DataOut {
        remaining: usize,
    },
    /// Our zero-length status IN is armed.
    StatusIn,
    /// Waiting for the host's zero-length status OUT.
    StatusOut,
    Stalled,
}

pub struct ControlDispatcher<'a> {
    shared: &'a Shared,
    serial: SerialNumber,
    stage: Stage,
    /// SET_ADDRESS value, applied once its status stage completes.
    pending_address: Option<u8>,
}

impl<'a> ControlDispatcher<'a> {
    pub fn new(shared: &'a Shared, serial: SerialNumber) -> Self {
        Self {
            shared,
            serial,
            stage: Stage::Idle,
            pending_address: None,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stage == Stage::Stalled
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// A SETUP packet arrived. Whatever transfer was in progress is gone.
    pub fn setup<E: ControlEndpoint>(&mut self, bytes: &[u8], ep: &mut E) {
        self.stage = Stage::Idle;
        self.pending_address = None;

        let result = UsbSetupPacket::parse(bytes).and_then(|setup| {
            log::trace!(
                "setup {:02x} {:02x} v={:04x} i={:04x} l={}",
                setup.request_type,
                setup.request,
                setup.value.get(),
                setup.index.get(),
                setup.length.get()
            );
            let reply = self.dispatch(setup, ep)?;
            Ok((reply, setup.direction(), usize::from(setup.length.get())))
        });

        match result {
            Ok((Reply::Data(source, len), UsbDir::In, max)) => {
                let total = len.min(max);
                if total == 0 {
                    self.status_in(ep);
                    return;
                }
                self.stage = Stage::DataIn {
                    source,
                    offset: 0,
                    remaining: total,
                    zlp: total % MAX_EP0_PACKET == 0,
                };
                self.send_next(ep);
                ep.expect_out();
            }
            Ok((_, UsbDir::Out, len)) if len > 0 => {
                self.stage = Stage::DataOut { remaining: len };
                ep.expect_out();
            }
            Ok(_) => self.status_in(ep),
            Err(e) => {
                log::warn!("ep0 stall: {}", e);
                self.stage = Stage::Stalled;
                ep.stall();
            }
        }
    }

    /// The last packet armed on EP0 IN has been collected by the host.
    pub fn in_complete<E: ControlEndpoint>(&mut self, ep: &mut E) {
        match self.stage {
            Stage::DataIn { .. } => {
                if !self.send_next(ep) {
                    self.stage = Stage::StatusOut;
                }
            }
            Stage::StatusIn => {
                if let Some(address) = self.pending_address.take() {
                    log::info!("address {}", address);
                    self.shared.config.address.store(address, Ordering::Relaxed);
                    ep.set_address(address);
                }
                self.stage = Stage::Idle;
            }
            _ => (),
        }
    }

    /// A packet arrived on EP0 OUT.
    pub fn out_complete<E: ControlEndpoint>(&mut self, len: usize, ep: &mut E) {
        match self.stage {
            // Status OUT, possibly early.
            Stage::DataIn { .. } | Stage::StatusOut => self.stage = Stage::Idle,
            Stage::DataOut { remaining } => {
                // No OUT request we accept carries data we care about.
                let remaining = remaining.saturating_sub(len);
                if remaining == 0 || len < MAX_EP0_PACKET {
                    self.status_in(ep);
                } else {
                    self.stage = Stage::DataOut { remaining };
                    ep.expect_out();
                }
            }
            _ => (),
        }
    }

    /// USB bus reset: back to address 0 and power-on state everywhere.
    pub fn bus_reset<E: ControlEndpoint>(&mut self, ep: &mut E) {
        log::info!("bus reset");
        self.stage = Stage::Idle;
        self.pending_address = None;
        ep.set_address(0);
        self.shared.bus_reset();
    }

    fn status_in<E: ControlEndpoint>(&mut self, ep: &mut E) {
        self.stage = Stage::StatusIn;
        ep.write_in(&[]);
    }

    /// Arms the next data-stage packet, if there is one left to send.
    fn send_next<E: ControlEndpoint>(&mut self, ep: &mut E) -> bool {
        let (source, offset, remaining, zlp) = match self.stage {
            Stage::DataIn {
                source,
                offset,
                remaining,
                zlp,
            } => (source, offset, remaining, zlp),
            _ => return false,
        };
        if remaining == 0 {
            if !zlp {
                return false;
            }
            ep.write_in(&[]);
            self.stage = Stage::DataIn {
                source,
                offset,
                remaining,
                zlp: false,
            };
            return true;
        }

        let mut buf = [0; MAX_EP0_PACKET];
        let want = remaining.min(MAX_EP0_PACKET);
        let n = source.copy_into(&self.serial, offset, &mut buf[..want]);
        ep.write_in(&buf[..n]);
        // A short read from the source ends the transfer here.
        let remaining = if n < want { 0 } else { remaining - n };
        self.stage = Stage::DataIn {
            source,
            offset: offset + n,
            remaining,
            zlp: zlp && n == want,
        };
        true
    }

    fn dispatch<E: ControlEndpoint>(&mut self, setup: &UsbSetupPacket, ep: &mut E) -> Result<Reply> {
        match setup.kind() {
            RequestKind::Standard => self.standard(setup, ep),
            RequestKind::Vendor => self.vendor(setup),
            RequestKind::Class | RequestKind::Reserved => Err(unsupported(setup)),
        }
    }

    fn standard<E: ControlEndpoint>(&mut self, setup: &UsbSetupPacket, ep: &mut E) -> Result<Reply> {
        let request = UsbSetupRequest::from_u8(setup.request).ok_or_else(|| unsupported(setup))?;
        match (setup.direction(), request) {
            (UsbDir::In, UsbSetupRequest::GetStatus) => {
                Ok(Reply::Data(Source::Inline([0, 0]), 2))
            }
            (UsbDir::Out, UsbSetupRequest::ClearFeature) => self.feature(setup, false, ep),
            (UsbDir::Out, UsbSetupRequest::SetFeature) => self.feature(setup, true, ep),
            (UsbDir::Out, UsbSetupRequest::SetAddress) => {
                self.pending_address = Some(setup.value_low() & 0x7f);
                Ok(Reply::Ack)
            }
            (UsbDir::In, UsbSetupRequest::GetDescriptor) => {
                let reply = match descriptors::lookup(setup.value_high(), setup.value_low())? {
                    Descriptor::Table(t) => Reply::Data(Source::Table(t), t.len()),
                    Descriptor::Serial => Reply::Data(Source::Serial, SERIAL_DESCRIPTOR_LEN),
                };
                Ok(reply)
            }
            (UsbDir::In, UsbSetupRequest::GetConfiguration) => {
                let value = self.shared.config.configuration.load(Ordering::Relaxed);
                Ok(Reply::Data(Source::Inline([value, 0]), 1))
            }
            (UsbDir::Out, UsbSetupRequest::SetConfiguration) => {
                let value = setup.value_low();
                if value != 0 && value != CONFIGURATION_VALUE {
                    return Err(unsupported(setup));
                }
                log::info!("configuration {}", value);
                // Selecting a configuration resets every bulk endpoint.
                self.shared.config.halted.store(0, Ordering::Relaxed);
                for &addr in &descriptors::BULK_ENDPOINTS {
                    ep.set_endpoint_halt(addr, false);
                }
                for channel in Channel::ALL {
                    self.shared.pipe(channel).in_complete();
                }
                self.shared
                    .config
                    .configuration
                    .store(value, Ordering::Release);
                Ok(Reply::Ack)
            }
            _ => Err(unsupported(setup)),
        }
    }

    /// SET_FEATURE / CLEAR_FEATURE. Endpoint halt is the only feature we do.
    fn feature<E: ControlEndpoint>(
        &mut self,
        setup: &UsbSetupPacket,
        halted: bool,
        ep: &mut E,
    ) -> Result<Reply> {
        let feature = setup.value.get();
        if setup.recipient() != Some(Recipient::Endpoint) || feature != FEATURE_ENDPOINT_HALT {
            return Err(Error::UnsupportedFeature {
                recipient: setup.request_type & 0x1f,
                feature,
            });
        }
        let addr = setup.index_low();
        let bit = descriptors::halt_bit(addr).ok_or(Error::UnknownEndpoint(addr))?;
        log::debug!("endpoint {:#04x} halt {}", addr, halted);

        self.shared.config.set_halted(bit, halted);
        ep.set_endpoint_halt(addr, halted);
        if UsbDir::of_endpoint_addr(addr) == UsbDir::In {
            // Whatever was armed has been dropped along with the toggle.
            let channel = match addr {
                JTAG_IN_ADDR | JTAG_OUT_ADDR => Channel::Jtag,
                _ => Channel::Uart,
            };
            self.shared.pipe(channel).in_complete();
        }
        Ok(Reply::Ack)
    }

    fn vendor(&mut self, setup: &UsbSetupPacket) -> Result<Reply> {
        let request = FtdiRequest::from_u8(setup.request).ok_or(Error::UnsupportedVendorRequest {
            request: setup.request,
        })?;
        let channel = Channel::from_index(setup.index.get());
        let config = &self.shared.config;
        log::debug!("ftdi {:?} {:?} {:#06x}", request, channel, setup.value.get());

        match (setup.direction(), request) {
            (UsbDir::In, FtdiRequest::PollModemStatus) => {
                Ok(Reply::Data(Source::Inline(MODEM_STATUS), 2))
            }
            (UsbDir::In, FtdiRequest::GetLatencyTimer) => {
                Ok(Reply::Data(Source::Inline([config.latency(channel), 0]), 1))
            }
            (UsbDir::In, FtdiRequest::ReadEeprom) => {
                let word = descriptors::eeprom_word(setup.index.get());
                Ok(Reply::Data(Source::Inline(word.to_le_bytes()), 2))
            }
            (UsbDir::Out, FtdiRequest::Reset) => {
                config.purge[channel.index()].store(true, Ordering::Release);
                Ok(Reply::Ack)
            }
            (UsbDir::Out, FtdiRequest::SetModemCtrl) => {
                if channel == Channel::Uart {
                    uart::request_modem_lines(config, ModemControl::from_value(setup.value.get()));
                }
                Ok(Reply::Ack)
            }
            (UsbDir::Out, FtdiRequest::SetBaudrate) => {
                if channel == Channel::Uart {
                    let baud = BaudSetting::from_divisor(setup.value.get());
                    log::info!("uart {} baud", baud.baud_rate());
                    config.baud.store(baud.to_bits(), Ordering::Relaxed);
                    config.baud_changed.store(true, Ordering::Release);
                }
                Ok(Reply::Ack)
            }
            (UsbDir::Out, FtdiRequest::SetLatencyTimer) => {
                config.latency[channel.index()].store(setup.value_low(), Ordering::Relaxed);
                Ok(Reply::Ack)
            }
            (UsbDir::Out, FtdiRequest::WriteEeprom) => {
                log::info!("eeprom write, rebooting to bootloader");
                config.reboot_requested.store(true, Ordering::Release);
                Ok(Reply::Ack)
            }
            // Line settings, special characters, and bit modes don't change
            // anything we emulate.
            (UsbDir::Out, FtdiRequest::SetFlowCtrl)
            | (UsbDir::Out, FtdiRequest::SetData)
            | (UsbDir::Out, FtdiRequest::SetEventChar)
            | (UsbDir::Out, FtdiRequest::SetErrorChar)
            | (UsbDir::Out, FtdiRequest::SetBitmode)
            | (UsbDir::Out, FtdiRequest::ReadChipId) => Ok(Reply::Ack),
            _ => Err(Error::UnsupportedVendorRequest {
                request: setup.request,
            }),
        }
    }
}

fn unsupported(setup: &UsbSetupPacket) -> Error {
    Error::UnsupportedRequest {
        request_type: setup.request_type,
        request: setup.request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{CONFIGURATION, DEVICE_DESCRIPTOR, MANUFACTURER};
    use crate::mock::MockEp0;
    use crate::state::DEFAULT_LATENCY;
    use zerocopy::AsBytes;

    fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
        let mut raw = [0; 8];
        raw[0] = request_type;
        raw[1] = request;
        raw[2..4].copy_from_slice(&value.to_le_bytes());
        raw[4..6].copy_from_slice(&index.to_le_bytes());
        raw[6..8].copy_from_slice(&length.to_le_bytes());
        raw
    }

    /// Runs an IN control transfer to completion and returns every packet
    /// the host saw in the data stage.
    fn control_in(
        d: &mut ControlDispatcher<'_>,
        ep: &mut MockEp0,
        raw: [u8; 8],
    ) -> Vec<Vec<u8>> {
        d.setup(&raw, ep);
        let mut guard = 0;
        while matches!(d.stage, Stage::DataIn { .. }) {
            d.in_complete(ep);
            guard += 1;
            assert!(guard < 100);
        }
        assert_eq!(d.stage, Stage::StatusOut);
        d.out_complete(0, ep);
        assert!(d.is_idle());
        ep.take_in_packets()
    }

    fn control_out(d: &mut ControlDispatcher<'_>, ep: &mut MockEp0, raw: [u8; 8]) {
        d.setup(&raw, ep);
        assert_eq!(d.stage, Stage::StatusIn, "request was stalled");
        assert_eq!(ep.take_in_packets(), vec![Vec::<u8>::new()]);
        d.in_complete(ep);
        assert!(d.is_idle());
    }

    fn dispatcher(shared: &Shared) -> ControlDispatcher<'_> {
        ControlDispatcher::new(shared, SerialNumber::new([0x01, 0x23, 0x45, 0x67, 0x89]))
    }

    #[test]
    fn test_device_descriptor_single_packet() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        let packets = control_in(&mut d, &mut ep, setup(0x80, 6, 0x0100, 0, 0x40));
        assert_eq!(packets, vec![DEVICE_DESCRIPTOR.as_bytes().to_vec()]);
        assert_eq!(ep.out_arms, 1);
    }

    #[test]
    fn test_config_descriptor_split_across_packets() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        // 55 bytes fit one packet; ask for the header only first.
        let packets = control_in(&mut d, &mut ep, setup(0x80, 6, 0x0200, 0, 9));
        assert_eq!(packets, vec![CONFIGURATION.as_bytes()[..9].to_vec()]);

        let packets = control_in(&mut d, &mut ep, setup(0x80, 6, 0x0200, 0, 0xff));
        assert_eq!(packets.concat(), CONFIGURATION.as_bytes());
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_multi_packet_and_zlp_rules() {
        // Exercise the packet splitter directly with a 128-byte table.
        static TABLE: [u8; 128] = [0x5a; 128];
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());

        d.stage = Stage::DataIn {
            source: Source::Table(&TABLE),
            offset: 0,
            remaining: 128,
            zlp: true,
        };
        while d.send_next(&mut ep) {}
        let sizes: Vec<usize> = ep.take_in_packets().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 64, 0]);

        d.stage = Stage::DataIn {
            source: Source::Table(&TABLE),
            offset: 0,
            remaining: 100,
            zlp: false,
        };
        while d.send_next(&mut ep) {}
        let sizes: Vec<usize> = ep.take_in_packets().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 36]);
    }

    #[test]
    fn test_string_descriptors_and_serial() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        let packets = control_in(&mut d, &mut ep, setup(0x80, 6, 0x0301, 0x0409, 0xff));
        assert_eq!(packets.concat(), MANUFACTURER.to_vec());

        let packets = control_in(&mut d, &mut ep, setup(0x80, 6, 0x0303, 0x0409, 0xff));
        let serial = packets.concat();
        assert_eq!(serial.len(), SERIAL_DESCRIPTOR_LEN);
        let text: Vec<u8> = serial[2..].iter().step_by(2).copied().collect();
        assert_eq!(text, b"0123456789");
    }

    #[test]
    fn test_unknown_descriptor_stalls_until_next_setup() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        d.setup(&setup(0x80, 6, 0x0600, 0, 10), &mut ep);
        assert!(d.is_stalled());
        assert_eq!(ep.stalls, 1);
        d.in_complete(&mut ep);
        assert!(d.is_stalled());

        control_in(&mut d, &mut ep, setup(0x80, 6, 0x0100, 0, 18));
        assert_eq!(ep.stalls, 1);
    }

    #[test]
    fn test_malformed_setup_stalls() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        d.setup(&[0x80, 6, 0, 1, 0, 0, 18], &mut ep);
        assert!(d.is_stalled());
        assert!(ep.in_packets.is_empty());
    }

    #[test]
    fn test_set_address_applies_after_status() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        d.setup(&setup(0x00, 5, 0x0017, 0, 0), &mut ep);
        assert_eq!(ep.address, None);
        assert_eq!(shared.config.address.load(Ordering::Relaxed), 0);
        d.in_complete(&mut ep);
        assert_eq!(ep.address, Some(0x17));
        assert_eq!(shared.config.address.load(Ordering::Relaxed), 0x17);
    }

    #[test]
    fn test_configuration_round_trip() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        assert!(!shared.config.is_configured());
        control_out(&mut d, &mut ep, setup(0x00, 9, 1, 0, 0));
        assert!(shared.config.is_configured());
        let packets = control_in(&mut d, &mut ep, setup(0x80, 8, 0, 0, 1));
        assert_eq!(packets, vec![vec![1]]);

        d.setup(&setup(0x00, 9, 7, 0, 0), &mut ep);
        assert!(d.is_stalled());
    }

    #[test]
    fn test_get_status_is_zero() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        let packets = control_in(&mut d, &mut ep, setup(0x82, 0, 0, 0x81, 2));
        assert_eq!(packets, vec![vec![0, 0]]);
    }

    #[test]
    fn test_endpoint_halt_set_and_clear() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        shared.pipe(Channel::Uart).mark_in_busy();

        control_out(&mut d, &mut ep, setup(0x02, 3, 0, 0x83, 0));
        assert!(shared.config.is_halted(0b0100));
        assert_eq!(ep.halts, vec![(0x83, true)]);

        control_out(&mut d, &mut ep, setup(0x02, 1, 0, 0x83, 0));
        assert!(!shared.config.is_halted(0b0100));
        assert_eq!(ep.halts, vec![(0x83, true), (0x83, false)]);
        assert!(!shared.pipe(Channel::Uart).in_busy());

        // Unknown endpoint, and remote wakeup, both stall.
        d.setup(&setup(0x02, 3, 0, 0x85, 0), &mut ep);
        assert!(d.is_stalled());
        d.setup(&setup(0x00, 3, 1, 0, 0), &mut ep);
        assert!(d.is_stalled());
    }

    #[test]
    fn test_vendor_reads() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        let packets = control_in(&mut d, &mut ep, setup(0xc0, 0x05, 0, 1, 2));
        assert_eq!(packets, vec![vec![0x01, 0x60]]);

        let packets = control_in(&mut d, &mut ep, setup(0xc0, 0x90, 0, 2, 2));
        assert_eq!(packets, vec![vec![0x10, 0x60]]);

        let packets = control_in(&mut d, &mut ep, setup(0xc0, 0x0a, 0, 2, 1));
        assert_eq!(packets, vec![vec![DEFAULT_LATENCY]]);
    }

    #[test]
    fn test_latency_timer_per_channel() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        control_out(&mut d, &mut ep, setup(0x40, 0x09, 16, 2, 0));
        control_out(&mut d, &mut ep, setup(0x40, 0x09, 1, 1, 0));
        assert_eq!(shared.config.latency(Channel::Uart), 16);
        assert_eq!(shared.config.latency(Channel::Jtag), 1);

        let packets = control_in(&mut d, &mut ep, setup(0xc0, 0x0a, 0, 2, 1));
        assert_eq!(packets, vec![vec![16]]);
    }

    #[test]
    fn test_baud_only_for_uart_channel() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        control_out(&mut d, &mut ep, setup(0x40, 0x03, 26, 1, 0));
        assert_eq!(shared.config.take_baud(), None);

        control_out(&mut d, &mut ep, setup(0x40, 0x03, 26, 2, 0));
        let baud = shared.config.take_baud().unwrap();
        assert_eq!(baud.reload, 9);
        assert_eq!(shared.config.take_baud(), None);
    }

    #[test]
    fn test_modem_control_and_reboot_and_reset() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        control_out(&mut d, &mut ep, setup(0x40, 0x01, 0x0101, 2, 0));
        let snap = shared.config.snapshot();
        assert!(snap.soft_dtr);
        assert_eq!(snap.modem_countdown, uart::MODEM_DEBOUNCE_TICKS);

        control_out(&mut d, &mut ep, setup(0x40, 0x00, 0, 1, 0));
        assert!(shared.config.take_purge(Channel::Jtag));
        assert!(!shared.config.take_purge(Channel::Uart));

        control_out(&mut d, &mut ep, setup(0x40, 0x91, 0, 0, 0));
        assert!(shared.config.snapshot().reboot_requested);

        for req in [0x02, 0x04, 0x06, 0x07, 0x0b, 0x92] {
            control_out(&mut d, &mut ep, setup(0x40, req, 0, 1, 0));
        }
    }

    #[test]
    fn test_read_chip_id_acks_without_side_effects() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        assert_eq!(FtdiRequest::from_u8(0x92), Some(FtdiRequest::ReadChipId));
        control_out(&mut d, &mut ep, setup(0x40, 0x92, 0, 1, 0));
        let snap = shared.config.snapshot();
        assert!(!snap.reboot_requested);
        assert!(!shared.config.take_purge(Channel::Jtag));
    }

    #[test]
    fn test_unknown_vendor_request_stalls() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        d.setup(&setup(0x40, 0x42, 0, 1, 0), &mut ep);
        assert!(d.is_stalled());
        // Right code, wrong direction.
        d.setup(&setup(0xc0, 0x09, 0, 1, 0), &mut ep);
        assert!(d.is_stalled());
        // Class requests aren't ours either.
        d.setup(&setup(0x21, 0x20, 0, 0, 7), &mut ep);
        assert!(d.is_stalled());
    }

    #[test]
    fn test_early_status_out_ends_transfer() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        d.setup(&setup(0x80, 6, 0x0100, 0, 0x40), &mut ep);
        d.out_complete(0, &mut ep);
        assert!(d.is_idle());
    }

    #[test]
    fn test_bus_reset_clears_everything() {
        let shared = Shared::new();
        let (mut d, mut ep) = (dispatcher(&shared), MockEp0::default());
        control_out(&mut d, &mut ep, setup(0x00, 5, 9, 0, 0));
        control_out(&mut d, &mut ep, setup(0x00, 9, 1, 0, 0));
        control_out(&mut d, &mut ep, setup(0x40, 0x09, 50, 1, 0));
        d.setup(&setup(0x00, 5, 12, 0, 0), &mut ep);

        let epoch = shared.epoch();
        d.bus_reset(&mut ep);
        assert!(d.is_idle());
        assert_eq!(ep.address, Some(0));
        assert_eq!(shared.config.snapshot(), crate::state::ConfigSnapshot::default());
        assert_ne!(shared.epoch(), epoch);

        // The address latched before the reset must not be applied.
        d.in_complete(&mut ep);
        assert_eq!(ep.address, Some(0));
    }
}
