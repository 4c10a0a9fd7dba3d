// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named statistics.
//!
//! Counters are declared as a struct of [`KStatU64`] fields deriving
//! [`KStatProvider`] (via `kstat-macro`), and registered under a
//! module/name pair with [`KStatNamed`]. A driver embedding the engine
//! may export the values to its host's statistics facility; in every
//! context they can be read back through [`KStatProvider::snapshot`].
use alloc::boxed::Box;
use alloc::string::String;
use thiserror::Error;

/// The longest module or stat name accepted, including the NUL a C
/// consumer would append.
pub const KSTAT_STRLEN: usize = 31;

/// A provider of named kstats.
///
/// Rather than implementing this trait manually, the kstat-macro
/// should be used.
///
/// # Example
///
/// To declare a new kstat provider simply define a struct of named
/// fields with type [`KStatU64`] and derive [`KStatProvider`].
///
/// ```
/// use tcp_lro::ddi::kstat::KStatProvider;
/// use tcp_lro::ddi::kstat::KStatU64;
/// use kstat_macro::KStatProvider;
///
/// #[derive(KStatProvider)]
/// struct SomeStats {
///     bytes_in: KStatU64,
///     errors_in: KStatU64,
/// }
///
/// let mut stats = SomeStats::new();
/// stats.bytes_in += 54;
/// assert_eq!(stats.snapshot().bytes_in, 54);
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
/// This should be called **exactly** once for a given provider.
pub struct KStatNamed<T: KStatProvider> {
    pub vals: Box<T>,
}

impl<T: KStatProvider> KStatNamed<T> {
    pub fn new(
        module: &str,
        name: &str,
        provider: T,
    ) -> Result<KStatNamed<T>, Error> {
        check_name(module)?;
        check_name(name)?;
        let mut vals = Box::new(provider);
        vals.init()?;
        Ok(Self { vals })
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.contains('\0') {
        return Err(Error::NulChar);
    }

    // The C-side consumer will automatically truncate, but we opt
    // to alert the caller instead.
    if name.len() + 1 > KSTAT_STRLEN {
        return Err(Error::NameTooLong(String::from(name)));
    }

    Ok(())
}

/// A 64-bit unsigned named kstat.
#[derive(Debug, Default)]
pub struct KStatU64 {
    value: u64,
}

impl KStatU64 {
    pub fn init(&mut self, name: &str) -> Result<(), Error> {
        check_name(name)
    }

    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn val(&self) -> u64 {
        self.value
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    #[inline]
    fn add_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_add(other);
    }
}

impl core::ops::SubAssign<u64> for KStatU64 {
    #[inline]
    fn sub_assign(&mut self, other: u64) {
        self.value = self.value.wrapping_sub(other);
    }
}

/// A kstat error.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("kstat name too long: {0}")]
    NameTooLong(String),
    #[error("kstat name contains NUL char")]
    NulChar,
}
