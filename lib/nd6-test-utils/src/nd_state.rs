// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for verifying the subsystem's counters.

use std::collections::BTreeMap;

/// The expected value of every counter. Tests bump the entries they
/// expect an event to touch and then assert that the subsystem agrees
/// on all of them, so that an unexpected bump elsewhere is caught too.
/// This type should be manipulated by the macros that follow.
pub struct NdExpect {
    pub counts: BTreeMap<String, u64>,
}

impl NdExpect {
    pub fn new() -> Self {
        let counts = nd6::engine::NdStatsSnap::default()
            .fields()
            .iter()
            .map(|(name, val)| (name.to_string(), *val))
            .collect();
        Self { counts }
    }
}

impl Default for NdExpect {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert that every counter matches the expected value.
#[macro_export]
macro_rules! assert_nd {
    ($h:expr) => {
        let snap = $h.nd.stats();
        for (field, actual) in snap.fields() {
            let expected = $h.expect.counts[field];
            assert!(
                expected == actual,
                "counter mismatch: field: {}, expected: {}, actual: {}",
                field,
                expected,
                actual,
            );
        }
    };
}

/// Increment a list of counters by one and assert all counters.
#[macro_export]
macro_rules! incr {
    ($h:expr, $fields:expr) => {
        for f in $fields {
            match $h.expect.counts.get_mut(f) {
                Some(v) => *v += 1,
                None => panic!("counter does not exist: {}", f),
            }
        }
        $crate::assert_nd!($h);
    };
}

/// Set a list of counters, given as `name=value` strings, and assert
/// all counters.
#[macro_export]
macro_rules! set {
    ($h:expr, $fields:expr) => {
        for f in $fields {
            let (name, val) = f.split_once('=').expect("expected name=value");
            let val: u64 = val.parse().expect("bad counter value");
            match $h.expect.counts.get_mut(name) {
                Some(v) => *v = val,
                None => panic!("counter does not exist: {}", name),
            }
        }
        $crate::assert_nd!($h);
    };
}
