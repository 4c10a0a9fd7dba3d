// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Finalizing aggregates.

use super::Deliver;
use super::LroCtrl;
use super::LroEntry;
use super::flush_probe;
use crate::ddi::mblk::MblkOffloadFlags;
use crate::ddi::mblk::MsgBlk;
use crate::engine::checksum::fold;
use crate::engine::ether::ETHER_HDR_LEN;
use crate::engine::ether::EtherHdr;
use crate::engine::ip4::IPV4_HDR_LEN;
use crate::engine::ip4::Ipv4Hdr;
use crate::engine::packet::LroFlowId;
use crate::engine::packet::ReadErr;
use crate::engine::tcp::TcpHdr;
use crate::provider::LogLevel;
use alloc::format;

/// Rewrite the headers of the first segment of `pkt` to describe the
/// whole aggregate held by `entry`.
fn finalize(pkt: &mut MsgBlk, entry: &LroEntry) -> Result<(), ReadErr> {
    let ip_len = u16::try_from(entry.len - ETHER_HDR_LEN)
        .map_err(|_| ReadErr::BadLayout)?;
    let tcp_len = ip_len - IPV4_HDR_LEN as u16;

    let (_, rest) = EtherHdr::parse(pkt)?;
    let (mut ip, rest) = Ipv4Hdr::parse(rest)?;
    let (mut tcp, _) = TcpHdr::parse(rest)?;

    ip.set_total_len(ip_len);
    ip.compute_hdr_csum();

    tcp.set_ack(entry.ack);
    tcp.set_window(entry.window);
    if let Some(ts) = entry.ts {
        tcp.set_timestamp(ts);
    }

    tcp.set_csum([0; 2]);
    let sum = u32::from(entry.data_csum)
        + u32::from(ip.pseudo_csum(tcp_len))
        + u32::from(tcp.csum_data());
    tcp.set_csum((0xFFFF ^ fold(sum)).to_ne_bytes());

    pkt.set_cksum_flags(
        MblkOffloadFlags::HCK_IPV4_HDRCKSUM_OK
            | MblkOffloadFlags::HCK_FULLCKSUM_OK,
    );
    Ok(())
}

impl<D: Deliver> LroCtrl<D> {
    /// Flush the entry in slot `idx` and return it to the free set.
    ///
    /// The entry must already have been removed from the active set.
    /// A lone segment is delivered untouched; an aggregate first has
    /// its headers rewritten.
    pub(super) fn flush(&mut self, idx: usize) {
        let entry = self.pool.entry_mut(idx);
        let Some(mut pkt) = entry.pkt.take() else {
            self.log.log(
                LogLevel::Error,
                &format!("{}: flush of empty LRO entry {idx}", self.ifp.name()),
            );
            self.pool.release(idx);
            return;
        };

        let entry = self.pool.entry(idx);
        if entry.append_cnt > 0 {
            if let Err(e) = finalize(&mut pkt, entry) {
                // Parsed on the way in, so this is an engine bug; pass the
                // chain along regardless.
                self.log.log(
                    LogLevel::Error,
                    &format!(
                        "{}: failed to finalize aggregate {}: {e}",
                        self.ifp.name(),
                        entry.flow
                    ),
                );
            }
        }

        flush_probe(&entry.flow, entry.append_cnt, entry.len);
        self.stats.vals.queued += u64::from(entry.append_cnt) + 1;
        self.stats.vals.flushed += 1;
        self.pool.release(idx);
        self.deliver.deliver(pkt);
    }

    /// Flush every active aggregate, most recent first.
    pub fn flush_all(&mut self) {
        while let Some(idx) = self.pool.pop_active() {
            self.flush(idx);
        }
    }

    /// Flush the aggregate of `flow`, if there is one.
    ///
    /// Returns true if an aggregate was flushed.
    pub fn flush_flow(&mut self, flow: &LroFlowId) -> bool {
        match self.pool.find(flow) {
            Some(idx) => {
                self.pool.deactivate(idx);
                self.flush(idx);
                true
            }

            None => false,
        }
    }
}
