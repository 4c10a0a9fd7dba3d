// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The receive path: eligibility checks, flow lookup, and merging.

use super::Deliver;
use super::LroCtrl;
use super::LroResult;
use super::decline_probe;
use crate::ddi::mblk::MblkOffloadFlags;
use crate::ddi::mblk::MsgBlk;
use crate::engine::checksum::csum_segments;
use crate::engine::checksum::csum_sub16;
use crate::engine::checksum::fold;
use crate::engine::checksum::rotate;
use crate::engine::ether::ETHER_HDR_LEN;
use crate::engine::ether::ETHER_TYPE_IPV4;
use crate::engine::ether::EtherHdr;
use crate::engine::ip4::IP_PROTO_TCP;
use crate::engine::ip4::IPV4_HDR_LEN;
use crate::engine::ip4::IPV4_MAX_LEN;
use crate::engine::ip4::IPV4_VERSION;
use crate::engine::ip4::Ipv4Hdr;
use crate::engine::packet::LroFlowId;
use crate::engine::tcp::TCP_HDR_SZ;
use crate::engine::tcp::TcpFlags;
use crate::engine::tcp::TcpHdr;
use crate::engine::tcp::TcpOpts;
use crate::engine::tcp::TcpTimestamp;
use core::cmp::Ordering;
use core::iter;

/// Offset of the TCP header in an eligible frame.
const TCP_OFF: usize = ETHER_HDR_LEN + IPV4_HDR_LEN;

/// The only TCP flags a segment may carry and still be merged.
const MERGE_FLAGS: u8 = TcpFlags::ACK | TcpFlags::PSH;

/// Why a frame was not aggregated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Decline {
    Short,
    NotIpv4,
    IpOptions,
    NotTcp,
    Fragment,
    BadIpCsum,
    TcpFlags,
    TcpOpts,
    BadLength,
    Truncated,
    OutOfOrder,
    StaleTimestamp,
    PoolFull,
}

impl Decline {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::NotIpv4 => "not_ipv4",
            Self::IpOptions => "ip_options",
            Self::NotTcp => "not_tcp",
            Self::Fragment => "fragment",
            Self::BadIpCsum => "bad_ip_csum",
            Self::TcpFlags => "tcp_flags",
            Self::TcpOpts => "tcp_opts",
            Self::BadLength => "bad_length",
            Self::Truncated => "truncated",
            Self::OutOfOrder => "out_of_order",
            Self::StaleTimestamp => "stale_timestamp",
            Self::PoolFull => "pool_full",
        }
    }

    fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::BadIpCsum
                | Self::BadLength
                | Self::Truncated
                | Self::OutOfOrder
        )
    }
}

/// The values of a segment's headers the merge needs.
#[derive(Clone, Copy, Debug)]
struct SegInfo {
    flow: LroFlowId,
    seq: u32,
    ack: u32,
    window: u16,
    ts: Option<TcpTimestamp>,
    /// IPv4 total length.
    ip_len: usize,
    /// Ethernet, IPv4, and TCP headers.
    hdr_len: usize,
    data_len: usize,
    /// Uncomplemented sum of the TCP header, options included.
    tcp_hdr_csum: u16,
}

impl SegInfo {
    fn frame_len(&self) -> usize {
        self.ip_len + ETHER_HDR_LEN
    }

    /// The uncomplemented sum of this segment's payload, given the sum
    /// over its IPv4 header and TCP segment.
    fn payload_csum(&self, l3_csum: u16) -> u16 {
        csum_sub16(l3_csum, self.tcp_hdr_csum)
    }
}

/// Check the Ethernet and IPv4 headers, returning the declared length
/// of the TCP header.
fn check_l3(pkt: &mut MsgBlk) -> Result<usize, Decline> {
    let hdr_ok =
        pkt.cksum_flags().contains(MblkOffloadFlags::HCK_IPV4_HDRCKSUM_OK);

    let (eth, rest) = EtherHdr::parse(pkt).map_err(|_| Decline::Short)?;
    if eth.ether_type() != ETHER_TYPE_IPV4 {
        return Err(Decline::NotIpv4);
    }

    let (ip, rest) = Ipv4Hdr::parse(rest).map_err(|_| Decline::Short)?;
    if ip.version() != IPV4_VERSION {
        return Err(Decline::NotIpv4);
    }
    if ip.hdr_len() != IPV4_HDR_LEN {
        return Err(Decline::IpOptions);
    }
    if ip.proto() != IP_PROTO_TCP {
        return Err(Decline::NotTcp);
    }
    if ip.is_fragment() {
        return Err(Decline::Fragment);
    }
    if !hdr_ok && !ip.csum_valid() {
        return Err(Decline::BadIpCsum);
    }

    // The data offset sits in the fixed part of the TCP header, which
    // the caller has pulled up.
    let off = *rest.get(12).ok_or(Decline::Short)?;
    Ok(usize::from(off >> 4) * 4)
}

/// Validate a frame and extract what the merge needs from it.
///
/// On success the headers are contiguous in the first segment and any
/// link-layer padding past the IPv4 total length has been trimmed.
fn parse_seg(pkt: &mut MsgBlk) -> Result<SegInfo, Decline> {
    pkt.pullup(TCP_OFF + TCP_HDR_SZ).map_err(|_| Decline::Short)?;

    let tcp_hdr_len = check_l3(pkt)?;
    if tcp_hdr_len < TCP_HDR_SZ {
        return Err(Decline::TcpOpts);
    }
    pkt.pullup(TCP_OFF + tcp_hdr_len).map_err(|_| Decline::Short)?;

    let (_, rest) = EtherHdr::parse(pkt).map_err(|_| Decline::Short)?;
    let (ip, rest) = Ipv4Hdr::parse(rest).map_err(|_| Decline::Short)?;
    let (tcp, _) = TcpHdr::parse(rest).map_err(|_| Decline::Short)?;

    if tcp.flags() & !MERGE_FLAGS != 0 {
        return Err(Decline::TcpFlags);
    }

    let ts = match tcp.opts() {
        TcpOpts::None => None,
        TcpOpts::Timestamp(ts) => Some(ts),
        TcpOpts::Other => return Err(Decline::TcpOpts),
    };

    let ip_len = usize::from(ip.total_len());
    let data_len = ip_len
        .checked_sub(IPV4_HDR_LEN + tcp.hdr_len())
        .ok_or(Decline::BadLength)?;

    let seg = SegInfo {
        flow: LroFlowId {
            src: ip.src(),
            dst: ip.dst(),
            src_port: tcp.src_port(),
            dst_port: tcp.dst_port(),
        },
        seq: tcp.seq(),
        ack: tcp.ack(),
        window: tcp.window(),
        ts,
        ip_len,
        hdr_len: TCP_OFF + tcp.hdr_len(),
        data_len,
        tcp_hdr_csum: tcp.csum_data(),
    };

    match pkt.byte_len().cmp(&seg.frame_len()) {
        Ordering::Less => return Err(Decline::Truncated),
        Ordering::Greater => pkt.truncate_chain(seg.frame_len()),
        Ordering::Equal => {}
    }

    Ok(seg)
}

/// Sum the IPv4 payload of a parsed frame in software.
///
/// The IPv4 header of an eligible frame sums to negative zero, so
/// leaving it out yields the same value a NIC would supply.
fn sw_l3_csum(pkt: &MsgBlk) -> u16 {
    let mut segs = pkt.iter().map(|seg| &seg[..]);
    let first = segs.next().and_then(|seg| seg.get(TCP_OFF..)).unwrap_or(&[]);
    csum_segments(iter::once(first).chain(segs))
}

impl<D: Deliver> LroCtrl<D> {
    /// Offer a received frame to the engine.
    ///
    /// `hw_csum` is the uncomplemented one's complement sum over the
    /// IPv4 header and TCP segment, as computed by the NIC; pass 0 if
    /// the NIC did not provide one and it is computed here instead.
    pub fn rx(&mut self, mut pkt: MsgBlk, hw_csum: u16) -> LroResult {
        let seg = match parse_seg(&mut pkt) {
            Ok(seg) => seg,
            Err(why) => {
                if why == Decline::BadIpCsum {
                    self.stats.vals.bad_csum += 1;
                }
                return declined(&LroFlowId::ANY, why, pkt);
            }
        };

        let l3_csum = if hw_csum == 0 { sw_l3_csum(&pkt) } else { hw_csum };

        match self.pool.find(&seg.flow) {
            Some(idx) => self.merge(idx, pkt, &seg, l3_csum),
            None => self.start(pkt, &seg, l3_csum),
        }
    }

    /// Begin aggregating a new flow with `pkt` as its first segment.
    fn start(
        &mut self,
        pkt: MsgBlk,
        seg: &SegInfo,
        l3_csum: u16,
    ) -> LroResult {
        let Some(idx) = self.pool.activate() else {
            return declined(&seg.flow, Decline::PoolFull, pkt);
        };

        let entry = self.pool.entry_mut(idx);
        entry.flow = seg.flow;
        entry.next_seq = seg.seq.wrapping_add(seg.data_len as u32);
        entry.append_cnt = 0;
        entry.len = seg.frame_len();
        entry.ack = seg.ack;
        entry.window = seg.window;
        entry.ts = seg.ts;
        entry.data_csum = seg.payload_csum(l3_csum);
        entry.pkt = Some(pkt);
        LroResult::Aggregated
    }

    /// Merge `pkt` into the active entry `idx`.
    fn merge(
        &mut self,
        idx: usize,
        mut pkt: MsgBlk,
        seg: &SegInfo,
        l3_csum: u16,
    ) -> LroResult {
        let entry = self.pool.entry(idx);

        if seg.seq != entry.next_seq {
            self.pool.deactivate(idx);
            self.flush(idx);
            return declined(&seg.flow, Decline::OutOfOrder, pkt);
        }

        // The timestamp may not go backwards, and the echo reply must
        // be set.
        if let Some(ts) = seg.ts {
            let cur = entry.ts.map(|cur| cur.val).unwrap_or(0);
            if ts.val < cur || ts.ecr == 0 {
                return declined(&seg.flow, Decline::StaleTimestamp, pkt);
            }
        }

        // An aggregate's length must fit the 16-bit IPv4 total length.
        // Close out the current one and start afresh with this segment.
        if entry.len + seg.data_len > IPV4_MAX_LEN + ETHER_HDR_LEN {
            self.pool.deactivate(idx);
            self.flush(idx);
            return self.start(pkt, seg, l3_csum);
        }

        let mut csum = 0;
        if seg.data_len > 0 {
            csum = seg.payload_csum(l3_csum);
            if pkt.drop_front_bytes(seg.hdr_len).is_err() {
                return declined(&seg.flow, Decline::Short, pkt);
            }
            pkt.drop_empty_segments();
        }

        let entry = self.pool.entry_mut(idx);
        entry.ack = seg.ack;
        entry.window = seg.window;
        if let (Some(cur), Some(ts)) = (entry.ts.as_mut(), seg.ts) {
            *cur = ts;
        }
        entry.append_cnt += 1;

        if seg.data_len == 0 {
            return LroResult::Aggregated;
        }

        // The payload lands at an odd offset of the aggregate when its
        // length is odd; the headers before it are all even-sized.
        if entry.len & 1 == 1 {
            csum = rotate(csum);
        }
        entry.data_csum = fold(u32::from(entry.data_csum) + u32::from(csum));
        entry.len += seg.data_len;
        entry.next_seq = entry.next_seq.wrapping_add(seg.data_len as u32);
        if let Some(chain) = entry.pkt.as_mut() {
            chain.append(pkt);
        }

        if entry.len > self.max_aggr_len() {
            self.pool.deactivate(idx);
            self.flush(idx);
        }

        LroResult::Aggregated
    }
}

fn declined(flow: &LroFlowId, why: Decline, pkt: MsgBlk) -> LroResult {
    decline_probe(flow, why.as_str());
    if why.is_invalid() {
        LroResult::Invalid(pkt)
    } else {
        LroResult::NotHandled(pkt)
    }
}
