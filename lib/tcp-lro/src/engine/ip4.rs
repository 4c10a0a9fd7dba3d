// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 header view.
//!
//! The LRO engine only aggregates IPv4 packets without options, so the
//! view covers the fixed 20-byte header. Options, if present, are left
//! in the remainder returned by [`Ipv4Hdr::parse`]; callers which care
//! check [`Ipv4Hdr::hdr_len`].

use super::checksum::csum_data;
use super::packet::ReadErr;
use core::mem::size_of;
use core::net::Ipv4Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

pub const IPV4_HDR_LEN: usize = size_of::<Ipv4HdrRaw>();
pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_MASK: u8 = 0xF0;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;

/// The largest value the 16-bit total length field can carry.
pub const IPV4_MAX_LEN: usize = u16::MAX as usize;

/// More-fragments flag of the flags/fragment-offset field.
pub const IPV4_MF: u16 = 0x2000;
/// Fragment offset mask of the flags/fragment-offset field.
pub const IPV4_OFFMASK: u16 = 0x1FFF;

pub const IP_PROTO_TCP: u8 = 6;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

/// A mutable view of a fixed IPv4 header.
pub struct Ipv4Hdr<'a> {
    bytes: Ref<&'a mut [u8], Ipv4HdrRaw>,
}

impl<'a> Ipv4Hdr<'a> {
    /// Split the fixed IPv4 header off the front of `src`, returning
    /// the view and the bytes which follow it.
    pub fn parse(src: &'a mut [u8]) -> Result<(Self, &'a mut [u8]), ReadErr> {
        if src.len() < IPV4_HDR_LEN {
            return Err(ReadErr::NotEnoughBytes {
                available: src.len(),
                needed: IPV4_HDR_LEN,
            });
        }

        let (bytes, rest) =
            Ref::from_prefix(src).map_err(|_| ReadErr::BadLayout)?;
        Ok((Self { bytes }, rest))
    }

    pub fn version(&self) -> u8 {
        (self.bytes.ver_hdr_len & IPV4_HDR_VER_MASK) >> IPV4_HDR_VER_SHIFT
    }

    /// The header length in bytes, as declared by the IHL field.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.bytes.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.bytes.total_len)
    }

    pub fn set_total_len(&mut self, len: u16) {
        self.bytes.total_len = len.to_be_bytes();
    }

    /// Return true if this packet is any fragment of a larger
    /// datagram: either more fragments follow or it sits at a
    /// non-zero offset.
    pub fn is_fragment(&self) -> bool {
        let frag = u16::from_be_bytes(self.bytes.frag_and_flags);
        frag & (IPV4_MF | IPV4_OFFMASK) != 0
    }

    pub fn ttl(&self) -> u8 {
        self.bytes.ttl
    }

    pub fn proto(&self) -> u8 {
        self.bytes.proto
    }

    pub fn csum(&self) -> [u8; 2] {
        self.bytes.csum
    }

    pub fn set_csum(&mut self, csum: [u8; 2]) {
        self.bytes.csum = csum;
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.bytes.src)
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.bytes.dst)
    }

    /// Return true if the header sums to all ones, as a header with a
    /// correct checksum field does.
    pub fn csum_valid(&self) -> bool {
        csum_data(self.bytes.as_bytes()) ^ 0xFFFF == 0
    }

    /// Recompute the header checksum from the current field values.
    pub fn compute_hdr_csum(&mut self) {
        self.bytes.csum = [0; 2];
        let csum = 0xFFFF ^ csum_data(self.bytes.as_bytes());
        self.bytes.csum = csum.to_ne_bytes();
    }

    /// The uncomplemented sum of the TCP/UDP pseudo-header for a
    /// transport payload of `ulp_len` bytes carried by this packet.
    pub fn pseudo_csum(&self, ulp_len: u16) -> u16 {
        pseudo_csum(self.src(), self.dst(), self.proto(), ulp_len)
    }
}

/// The uncomplemented sum of an IPv4 pseudo-header.
pub fn pseudo_csum(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ulp_len: u16,
) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = proto;
    pseudo[10..12].copy_from_slice(&ulp_len.to_be_bytes());
    csum_data(&pseudo)
}
