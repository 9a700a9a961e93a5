// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the nd6 engine and its consumers: addresses,
//! parsed Neighbor Discovery messages, tunables, and the command
//! request/response structures.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod cfg;
pub mod cmd;
pub mod ip;
pub mod mac;
pub mod ndp;

pub use cfg::*;
pub use cmd::*;
pub use ip::*;
pub use mac::*;
pub use ndp::*;

/// The overall version of the API. Anytime a command or one of its
/// request/response types is added, removed, or modified, this number
/// should increment. It carries no semantic meaning beyond verifying
/// that both sides of the command boundary were built from the same
/// API.
pub const API_VERSION: u64 = 3;

/// The index of an interface, as assigned by the interface layer.
pub type IfIndex = u32;
