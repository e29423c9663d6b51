// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol core of an FTDI-compatible dual-channel USB adapter.
//!
//! Channel A speaks MPSSE and drives a JTAG port; channel B is a plain UART
//! bridge. Everything here is hardware-independent: the firmware binary
//! implements the small traits in `control`, `pipe`, `jtag` and `uart` on
//! top of the RP2040 registers, and the unit tests implement them with
//! fakes.

#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod control;
pub mod descriptors;
pub mod error;
pub mod ftdi;
pub mod jtag;
pub mod mpsse;
pub mod pipe;
pub mod ring;
pub mod state;
pub mod uart;
pub mod usb;

#[cfg(test)]
mod mock;
