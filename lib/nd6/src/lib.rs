// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv6 Neighbor Discovery default router and prefix management.
//!
//! The `api` feature re-exports the types shared with consumers. The
//! `engine` feature provides the subsystem itself: the default router
//! list, the prefix list, Router Advertisement ingestion, stateless
//! address autoconfiguration, and the on-link route installer. The
//! world outside the subsystem (route table, neighbor cache, address
//! management, packet output) is reached through the traits in
//! [`provider`].

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg_attr(feature = "engine", macro_use)]
extern crate alloc;

// This is needed so that the kstat-macro (`#[derive(KStatProvider)]`)
// can use fully-qualified type paths.
extern crate self as nd6;

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod ddi;
#[cfg(any(feature = "engine", test))]
#[macro_use]
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
#[cfg(any(feature = "engine", test))]
pub mod provider;
#[cfg(any(feature = "test-help", test))]
pub mod sim;
