// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP header view.

use super::checksum::csum_data;
use super::checksum::fold;
use super::packet::ReadErr;
use core::mem::size_of;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

pub const TCP_HDR_OFFSET_MASK: u8 = 0xF0;
pub const TCP_HDR_OFFSET_SHIFT: u8 = 4;
pub const TCP_HDR_SZ: usize = size_of::<TcpHdrRaw>();

pub const TCPOPT_NOP: u8 = 1;
pub const TCPOPT_TIMESTAMP: u8 = 8;
pub const TCPOLEN_TIMESTAMP: u8 = 10;

/// Length of the timestamp option padded to a 32-bit boundary with
/// two leading NOPs, as recommended by RFC 7323 Appendix A.
pub const TCPOLEN_TSTAMP_APPA: usize = TCPOLEN_TIMESTAMP as usize + 2;

/// The first word of an appendix-A timestamp option block.
pub const TCPOPT_TSTAMP_HDR: u32 = (TCPOPT_NOP as u32) << 24
    | (TCPOPT_NOP as u32) << 16
    | (TCPOPT_TIMESTAMP as u32) << 8
    | TCPOLEN_TIMESTAMP as u32;

/// The standard TCP flags. We don't bother with the experimental NS
/// flag.
pub mod TcpFlags {
    pub const FIN: u8 = crate::bit_on(0);
    pub const SYN: u8 = crate::bit_on(1);
    pub const RST: u8 = crate::bit_on(2);
    pub const PSH: u8 = crate::bit_on(3);
    pub const ACK: u8 = crate::bit_on(4);
    pub const URG: u8 = crate::bit_on(5);
    pub const ECE: u8 = crate::bit_on(6);
    pub const CWR: u8 = crate::bit_on(7);
}

/// The values carried by a timestamp option, in host order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpTimestamp {
    pub val: u32,
    pub ecr: u32,
}

/// The shape of the options area, as far as the LRO engine cares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpOpts {
    None,
    /// Exactly one appendix-A timestamp block.
    Timestamp(TcpTimestamp),
    /// Anything else.
    Other,
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl TcpHdrRaw {
    fn get_offset(&self) -> u8 {
        (self.offset & TCP_HDR_OFFSET_MASK) >> TCP_HDR_OFFSET_SHIFT
    }
}

/// A mutable view of a TCP header, including its options.
pub struct TcpHdr<'a> {
    base: Ref<&'a mut [u8], TcpHdrRaw>,
    opts: &'a mut [u8],
}

impl<'a> TcpHdr<'a> {
    /// Split the TCP header (with options) off the front of `src`,
    /// returning the view and the segment payload which follows it.
    pub fn parse(src: &'a mut [u8]) -> Result<(Self, &'a mut [u8]), ReadErr> {
        if src.len() < TCP_HDR_SZ {
            return Err(ReadErr::NotEnoughBytes {
                available: src.len(),
                needed: TCP_HDR_SZ,
            });
        }

        let (base, rest) = Ref::<_, TcpHdrRaw>::from_prefix(src)
            .map_err(|_| ReadErr::BadLayout)?;

        let hdr_len = usize::from(base.get_offset()) * 4;
        if hdr_len < TCP_HDR_SZ {
            return Err(ReadErr::BadLayout);
        }

        let opts_len = hdr_len - TCP_HDR_SZ;
        if rest.len() < opts_len {
            return Err(ReadErr::NotEnoughBytes {
                available: rest.len() + TCP_HDR_SZ,
                needed: hdr_len,
            });
        }

        let (opts, body) = rest.split_at_mut(opts_len);
        Ok((Self { base, opts }, body))
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.base.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.base.dst_port)
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.base.seq)
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.base.ack)
    }

    pub fn set_ack(&mut self, ack: u32) {
        self.base.ack = ack.to_be_bytes();
    }

    pub fn flags(&self) -> u8 {
        self.base.flags
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes(self.base.win)
    }

    pub fn set_window(&mut self, win: u16) {
        self.base.win = win.to_be_bytes();
    }

    pub fn csum(&self) -> [u8; 2] {
        self.base.csum
    }

    pub fn set_csum(&mut self, csum: [u8; 2]) {
        self.base.csum = csum;
    }

    /// The header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        TCP_HDR_SZ + self.opts.len()
    }

    /// Classify the options area.
    pub fn opts(&self) -> TcpOpts {
        match self.opts.len() {
            0 => TcpOpts::None,

            TCPOLEN_TSTAMP_APPA => {
                let word = |i: usize| {
                    u32::from_be_bytes([
                        self.opts[i],
                        self.opts[i + 1],
                        self.opts[i + 2],
                        self.opts[i + 3],
                    ])
                };

                if word(0) != TCPOPT_TSTAMP_HDR {
                    return TcpOpts::Other;
                }

                TcpOpts::Timestamp(TcpTimestamp { val: word(4), ecr: word(8) })
            }

            _ => TcpOpts::Other,
        }
    }

    /// Overwrite the values of an appendix-A timestamp block.
    ///
    /// Returns false, leaving the header untouched, if the options
    /// area is not exactly such a block.
    pub fn set_timestamp(&mut self, ts: TcpTimestamp) -> bool {
        if !matches!(self.opts(), TcpOpts::Timestamp(_)) {
            return false;
        }

        self.opts[4..8].copy_from_slice(&ts.val.to_be_bytes());
        self.opts[8..12].copy_from_slice(&ts.ecr.to_be_bytes());
        true
    }

    /// The uncomplemented sum of the whole header, options included.
    pub fn csum_data(&self) -> u16 {
        let base = csum_data(self.base.as_bytes());
        let opts = csum_data(&self.opts[..]);
        fold(u32::from(base) + u32::from(opts))
    }
}
