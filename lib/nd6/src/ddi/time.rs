// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments and clocks.
//!
//! Neighbor Discovery keeps every lifetime in whole seconds, so a
//! [`Moment`] is simply a count of seconds since boot.
use core::fmt;
use core::fmt::Display;
use core::ops::Add;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;

/// A point in time, in seconds since boot.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Moment(u64);

impl Moment {
    pub const BOOT: Self = Self(0);

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn secs(&self) -> u64 {
        self.0
    }

    /// The number of seconds from `earlier` to `self`, or zero if
    /// `earlier` is actually later.
    pub fn delta_as_secs(&self, earlier: Moment) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// `self` pushed `secs` seconds into the future, saturating.
    #[must_use]
    pub fn saturating_add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl Add<u32> for Moment {
    type Output = Moment;

    fn add(self, secs: u32) -> Moment {
        self.saturating_add_secs(u64::from(secs))
    }
}

impl Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// A monotonic source of [`Moment`]s.
pub trait Clock: Send + Sync {
    fn now(&self) -> Moment;
}

/// The host's monotonic clock, counted from the moment the clock was
/// created.
pub struct BootClock {
    start: Instant,
}

impl BootClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for BootClock {
    fn now(&self) -> Moment {
        Moment(self.start.elapsed().as_secs())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn saturating_moments() {
        let m = Moment::from_secs(10);
        assert_eq!((m + 5).secs(), 15);
        assert_eq!(m.delta_as_secs(Moment::from_secs(20)), 0);
        let max = Moment::from_secs(u64::MAX);
        assert_eq!(max + 1, max);
    }
}
