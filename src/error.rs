// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol errors raised while handling control requests.
//!
//! Every one of these ends the same way on the wire: EP0 stalls in both
//! directions until the next SETUP token. They exist as distinct variants so
//! that the log says *why* we stalled.

use core::fmt;

/// Control-request failure. `no_std` compatible and `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// SETUP stage that wasn't exactly 8 bytes.
    MalformedSetup {
        /// Number of bytes actually received.
        length: usize,
    },
    /// Standard (or class) request we don't implement.
    UnsupportedRequest {
        /// Raw `bmRequestType`.
        request_type: u8,
        /// Raw `bRequest`.
        request: u8,
    },
    /// GET_DESCRIPTOR for a type we don't serve.
    UnsupportedDescriptor {
        /// High byte of `wValue`.
        descriptor_type: u8,
        /// Low byte of `wValue`.
        index: u8,
    },
    /// SET_FEATURE / CLEAR_FEATURE with a selector or recipient we don't
    /// support (remote wakeup, test mode, interface features).
    UnsupportedFeature {
        /// Recipient bits of `bmRequestType`.
        recipient: u8,
        /// Feature selector from `wValue`.
        feature: u16,
    },
    /// Endpoint-recipient request naming an endpoint this device lacks.
    UnknownEndpoint(u8),
    /// FTDI vendor request code outside the implemented subset.
    UnsupportedVendorRequest {
        /// Raw `bRequest`.
        request: u8,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedSetup { length } => {
                write!(f, "setup packet of {} bytes", length)
            }
            Error::UnsupportedRequest {
                request_type,
                request,
            } => write!(
                f,
                "unsupported request {:#04x} (type {:#04x})",
                request, request_type
            ),
            Error::UnsupportedDescriptor {
                descriptor_type,
                index,
            } => write!(
                f,
                "no descriptor of type {:#04x} index {}",
                descriptor_type, index
            ),
            Error::UnsupportedFeature { recipient, feature } => write!(
                f,
                "feature {} not supported for recipient {}",
                feature, recipient
            ),
            Error::UnknownEndpoint(addr) => write!(f, "unknown endpoint {:#04x}", addr),
            Error::UnsupportedVendorRequest { request } => {
                write!(f, "unsupported vendor request {:#04x}", request)
            }
        }
    }
}

/// Result type for control-request handling.
pub type Result<T> = core::result::Result<T, Error>;
