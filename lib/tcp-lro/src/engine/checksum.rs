// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! [`Checksum`] is a rolling one's complement sum which delays
//! folding the carries until the value is needed. [`csum_data`] is the
//! fixed-stride primitive used on headers, and [`fold`] /
//! [`rotate`] are the pieces needed to concatenate sums of adjacent
//! byte ranges; [`csum_segments`] does so for a segmented buffer.
//!
//! # Checksums and Endianness
//!
//! The checksum field is never byte-swapped. Words are summed exactly
//! as they sit in memory (`from_ne_bytes`), and the final sum is
//! written back the same way (`to_ne_bytes`). On a little-endian host
//! every word is logically flipped, but since the sum is flipped in
//! the same way when it's stored, the bytes on the wire come out in
//! network order. RFC 1071 §1.B covers this in more detail.
//!
//! The consequence for the LRO engine is that every partial sum it
//! carries around (hardware supplied or computed) is in this
//! host-native form, and can be added to any other without
//! conversion.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1141 Incremental Updating of the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// A rolling one's complement checksum calculation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self { inner: 0 }
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

/// Sum `bytes` as native-endian 16-bit words, two words per step, and
/// fold the result to 16 bits.
///
/// The result is **not** complemented. `bytes.len()` must be a
/// multiple of 4; every IPv4 and TCP header satisfies this.
pub fn csum_data(bytes: &[u8]) -> u16 {
    debug_assert_eq!(bytes.len() % 4, 0, "csum_data on unaligned length");

    let mut csum = 0u32;
    for pair in bytes.chunks_exact(4) {
        csum += u32::from(u16::from_ne_bytes([pair[0], pair[1]]));
        csum += u32::from(u16::from_ne_bytes([pair[2], pair[3]]));
    }

    fold(csum)
}

/// Fold a 32-bit one's complement accumulator to 16 bits by applying
/// the end-around carry twice.
///
/// Two rounds always suffice: the first leaves at most `0x1FFFE`, the
/// second at most `0xFFFF`. Folding an already-folded value is the
/// identity.
#[inline]
pub const fn fold(csum: u32) -> u16 {
    let csum = (csum & 0xFFFF) + (csum >> 16);
    let csum = (csum & 0xFFFF) + (csum >> 16);
    csum as u16
}

/// Swap the two bytes of a 16-bit sum.
///
/// A sum computed over bytes that begin at an odd offset of the
/// stream they are concatenated onto has its words misaligned by one
/// byte; rotating it realigns it with the words of the stream.
#[inline]
pub const fn rotate(csum: u16) -> u16 {
    csum.rotate_left(8)
}

/// One's complement subtraction of `b` from `a`, folded.
#[inline]
pub const fn csum_sub16(a: u16, b: u16) -> u16 {
    fold(a as u32 + (b ^ 0xFFFF) as u32)
}

/// Sum a byte stream which is split across several slices.
///
/// Slices may have any length; a slice which starts at an odd offset
/// of the stream has its partial sum rotated into place. The result
/// is folded and **not** complemented.
pub fn csum_segments<'a, I>(segs: I) -> u16
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut sum = 0u16;
    let mut odd = false;

    for seg in segs {
        let mut part = Checksum::compute(seg).finalize();
        if odd {
            part = rotate(part);
        }
        sum = fold(u32::from(sum) + u32::from(part));
        odd ^= seg.len() % 2 == 1;
    }

    sum
}

#[inline]
fn add_carry(a: u32, b: u32) -> u32 {
    let (sum, carry) = a.overflowing_add(b);
    if carry { fold(sum) as u32 + 1 } else { sum }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for word in &mut chunks {
        let word = u16::from_ne_bytes([word[0], word[1]]);
        csum = add_carry(csum, u32::from(word));
    }

    // A trailing odd byte is padded with a zero byte on the right.
    if let [last] = chunks.remainder() {
        csum = add_carry(csum, u32::from(u16::from_ne_bytes([*last, 0])));
    }

    csum
}
