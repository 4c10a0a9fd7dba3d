// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP Large Receive Offload.
//!
//! This crate coalesces in-order TCP segments of the same flow into a
//! single large frame before handing it to the upper layers of a
//! network stack. The engine lives in [`engine::lro`]; the packet
//! buffer abstraction it operates on is [`ddi::mblk::MsgBlk`].

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

extern crate alloc;

#[macro_use]
extern crate cfg_if;

// This is needed so that the kstat-macro (`#[derive(KStatProvider)]`)
// can use fully-qualified type paths.
extern crate self as tcp_lro;

pub mod cfg;
pub mod ddi;
pub mod engine;
pub mod provider;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u8 {
    0x1 << bit
}

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace the LRO engine when running in
// std/test.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod lro_provider {
    fn lro__flush(flow: &str, append_cnt: u64, len: u64) {}
    fn lro__decline(flow: &str, reason: &str) {}
}
