// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named statistics.
use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::ops::Deref;
use core::ops::DerefMut;

/// A provider of named counters.
///
/// Rather than implementing this trait manually, the kstat-macro
/// should be used.
///
/// # Example
///
/// To declare a new kstat provider simply define a struct of named
/// fields with type [`KStatU64`] and derive [`KStatProvider`].
///
/// ```ignore
/// #[derive(KStatProvider)]
/// struct SomeStats {
///     ra_in: KStatU64,
///     ra_bad: KStatU64,
/// }
/// ```
///
/// To update the values use the `+=` operator.
///
/// ```ignore
/// stats.ra_in += 1;
/// ```
pub trait KStatProvider {
    const NUM_FIELDS: u32;
    type Snap;

    fn init(&mut self) -> Result<(), Error>;

    fn new() -> Self;

    fn num_fields(&self) -> u32 {
        Self::NUM_FIELDS
    }

    /// Return a snapshot of the stats. This is how you obtain a copy,
    /// as opposed to the traditional clone().
    fn snapshot(&self) -> Self::Snap;
}

/// Initialize and register a [`KStatProvider`].
///
/// There is no kstat system to register with in userland; we just
/// allocate the stats. This allows tests to verify that certain
/// statistics are incremented when expected.
pub struct KStatNamed<T: KStatProvider> {
    module: String,
    name: String,
    vals: Box<T>,
}

impl<T: KStatProvider> KStatNamed<T> {
    pub fn new(
        module: &str,
        name: &str,
        mut provider: T,
    ) -> Result<KStatNamed<T>, Error> {
        if name.len() > KSTAT_STRLEN {
            return Err(Error::NameTooLong(name.into()));
        }
        if name.contains('\0') || module.contains('\0') {
            return Err(Error::NulChar);
        }
        provider.init()?;
        Ok(Self {
            module: module.into(),
            name: name.into(),
            vals: Box::new(provider),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: KStatProvider> Deref for KStatNamed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.vals
    }
}

impl<T: KStatProvider> DerefMut for KStatNamed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.vals
    }
}

/// The longest name a kstat may carry.
pub const KSTAT_STRLEN: usize = 31;

/// A 64-bit unsigned named counter.
#[derive(Debug, Default)]
pub struct KStatU64 {
    value: u64,
}

impl KStatU64 {
    pub fn init(&mut self, name: &str) -> Result<(), Error> {
        if name.len() > KSTAT_STRLEN {
            return Err(Error::NameTooLong(name.into()));
        }
        Ok(())
    }

    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn set(&mut self, val: u64) {
        self.value = val;
    }

    pub fn val(&self) -> u64 {
        self.value
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    fn add_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_add(other);
    }
}

impl core::ops::SubAssign<u64> for KStatU64 {
    fn sub_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_sub(other);
    }
}

/// A kstat error.
#[derive(Clone, Debug)]
pub enum Error {
    NameTooLong(String),
    NulChar,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NameTooLong(name) => {
                write!(f, "kstat name too long: {name}")
            }

            Self::NulChar => write!(f, "kstat name contains NUL char"),
        }
    }
}
