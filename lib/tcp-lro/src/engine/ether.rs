// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ethernet frame header.

use super::packet::ReadErr;
use core::fmt;
use core::fmt::Display;
use core::mem::size_of;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

pub const ETHER_HDR_LEN: usize = size_of::<EtherHdrRaw>();
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_ADDR_LEN: usize = 6;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EtherAddr {
    bytes: [u8; ETHER_ADDR_LEN],
}

impl EtherAddr {
    pub const fn from_bytes(bytes: [u8; ETHER_ADDR_LEN]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> [u8; ETHER_ADDR_LEN] {
        self.bytes
    }
}

impl Display for EtherAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct EtherHdrRaw {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ether_type: [u8; 2],
}

/// A view of the Ethernet header at the front of a frame.
pub struct EtherHdr<'a> {
    bytes: Ref<&'a mut [u8], EtherHdrRaw>,
}

impl<'a> EtherHdr<'a> {
    /// Split the Ethernet header off the front of `src`, returning
    /// the view and the bytes which follow it.
    pub fn parse(src: &'a mut [u8]) -> Result<(Self, &'a mut [u8]), ReadErr> {
        if src.len() < ETHER_HDR_LEN {
            return Err(ReadErr::NotEnoughBytes {
                available: src.len(),
                needed: ETHER_HDR_LEN,
            });
        }

        let (bytes, rest) =
            Ref::from_prefix(src).map_err(|_| ReadErr::BadLayout)?;
        Ok((Self { bytes }, rest))
    }

    pub fn dst(&self) -> EtherAddr {
        EtherAddr::from_bytes(self.bytes.dst)
    }

    pub fn src(&self) -> EtherAddr {
        EtherAddr::from_bytes(self.bytes.src)
    }

    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.bytes.ether_type)
    }
}
