// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Lifetime arithmetic.
//!
//! Valid and preferred lifetimes arrive as relative seconds and are
//! turned into absolute deadlines when they are recorded.
//! [`ND6_INFINITE_LIFETIME`] never expires, which is represented as a
//! deadline of `None`.

use crate::api::MAX_RANDOM_FACTOR;
use crate::api::MIN_RANDOM_FACTOR;
use crate::api::ND6_INFINITE_LIFETIME;
use crate::api::TWO_HOURS;
use crate::ddi::time::Moment;
use crate::provider::RandomSource;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LifetimeError {
    #[error("preferred lifetime {pltime} exceeds valid lifetime {vltime}")]
    PreferredExceedsValid { vltime: u32, pltime: u32 },
}

/// A valid/preferred lifetime pair along with the deadlines derived
/// from them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Lifetimes {
    pub vltime: u32,
    pub pltime: u32,
    pub expire: Option<Moment>,
    pub preferred: Option<Moment>,
}

fn deadline(now: Moment, lifetime: u32) -> Option<Moment> {
    if lifetime == ND6_INFINITE_LIFETIME {
        None
    } else {
        Some(now + lifetime)
    }
}

impl Lifetimes {
    pub const INFINITE: Self = Self {
        vltime: ND6_INFINITE_LIFETIME,
        pltime: ND6_INFINITE_LIFETIME,
        expire: None,
        preferred: None,
    };

    /// The lifetimes of a prefix. A preferred lifetime longer than the
    /// valid lifetime makes the whole prefix option invalid.
    pub fn for_prefix(
        vltime: u32,
        pltime: u32,
        now: Moment,
    ) -> Result<Self, LifetimeError> {
        if pltime > vltime {
            return Err(LifetimeError::PreferredExceedsValid {
                vltime,
                pltime,
            });
        }

        Ok(Self::for_address(vltime, pltime, now))
    }

    /// The lifetimes of an address. No ordering between the two is
    /// enforced.
    pub fn for_address(vltime: u32, pltime: u32, now: Moment) -> Self {
        Self {
            vltime,
            pltime,
            expire: deadline(now, vltime),
            preferred: deadline(now, pltime),
        }
    }

    /// Lifetimes of zero, as used for entries kept only for
    /// bookkeeping.
    pub fn expired(now: Moment) -> Self {
        Self::for_address(0, 0, now)
    }

    pub fn is_infinite(&self) -> bool {
        self.vltime == ND6_INFINITE_LIFETIME
    }

    /// Has the valid lifetime run out?
    pub fn is_invalid(&self, now: Moment) -> bool {
        self.expire.is_some_and(|e| e < now)
    }

    /// Has the preferred lifetime run out?
    pub fn is_deprecated(&self, now: Moment) -> bool {
        self.preferred.is_some_and(|p| p < now)
    }

    /// The valid lifetime left at `now` when the lifetime was last set
    /// at `updated`.
    pub fn remaining_valid(&self, updated: Moment, now: Moment) -> u32 {
        if self.is_infinite() {
            return ND6_INFINITE_LIFETIME;
        }

        let age = now.delta_as_secs(updated);
        if age > u64::from(self.vltime) {
            0
        } else {
            // Lossless: age <= vltime.
            self.vltime - age as u32
        }
    }
}

/// The two hour rule of RFC 4862 §5.5.3 (e), applied when an
/// advertisement refreshes an autoconfigured address.
///
/// `advertised` is the advertised valid lifetime and `stored` the
/// remaining valid lifetime of the address. An unauthenticated
/// advertisement can never pull a lifetime below two hours, nor shorten
/// one that is already at or below two hours.
pub fn two_hour_rule(advertised: u32, stored: u32, authenticated: bool) -> u32 {
    if TWO_HOURS < advertised || stored < advertised {
        advertised
    } else if stored <= TWO_HOURS {
        // The third condition of the RFC, the advertised lifetime
        // being the larger, is covered by the first branch.
        if authenticated { advertised } else { stored }
    } else {
        TWO_HOURS
    }
}

/// Randomize a base reachable time, in milliseconds, to a value
/// uniformly distributed over `[0.5, 1.5)` times the base.
pub fn compute_rtime(random: &dyn RandomSource, base: u32) -> u32 {
    let unit = base >> 10;
    let min = MIN_RANDOM_FACTOR * unit;
    let span = (MAX_RANDOM_FACTOR - MIN_RANDOM_FACTOR) * unit;
    if span == 0 {
        return min;
    }
    min + random.next_u32() % span
}
