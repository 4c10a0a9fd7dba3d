// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP segment coalescing.
//!
//! An [`LroCtrl`] sits on the receive path of a single interface. Each
//! frame handed to [`LroCtrl::rx`] is either declined (and handed
//! back), or absorbed into an [`LroEntry`]: the per-flow aggregate of
//! in-order segments seen so far. When an entry is flushed its headers
//! are rewritten to describe the whole aggregate and the chain is
//! passed to the [`Deliver`] collaborator.
//!
//! # Entry lifecycle
//!
//! Entries live in a fixed pool allocated up front. A slot is either
//! free or active; a frame from an unknown flow moves a free slot to
//! the active set, and a flush moves it back. Flushes happen when:
//!
//! * a segment arrives out of order for the flow,
//! * the aggregate grows past `65535 - MTU` bytes,
//! * the embedder calls [`LroCtrl::flush_all`] (typically at the end
//!   of a receive interrupt), or [`LroCtrl::flush_flow`].
//!
//! There is no time-based aging; an embedder which stops calling
//! `flush_all` will hold on to partial aggregates.
//!
//! # Checksums
//!
//! Each entry carries `data_csum`, the one's complement sum of every
//! payload byte merged so far. The per-segment payload sum is derived
//! from the partial checksum supplied by the NIC (or computed in
//! software when the NIC offers none) by subtracting the sum of the
//! TCP header. At flush the TCP checksum is rebuilt from `data_csum`,
//! the pseudo-header, and the rewritten header, without touching the
//! payload again.

mod flush;
mod pool;
mod rx;

use super::packet::LroFlowId;
use super::tcp::TcpTimestamp;
use crate::cfg::LroCfg;
use crate::ddi::kstat;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;
use crate::ddi::mblk::MsgBlk;
use crate::ddi::mblk::MsgBlkChain;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use kstat_macro::KStatProvider;
use pool::LroPool;
use thiserror::Error;

cfg_if! {
    if #[cfg(feature = "usdt")] {
        use alloc::string::ToString;
    }
}

/// The kstat module under which each controller registers its stats.
pub const LRO_KSTAT_MODULE: &str = "tcp_lro";

/// The outcome of handing a frame to [`LroCtrl::rx`].
///
/// A declined frame is handed back to the caller, who is expected to
/// pass it up the stack unmodified (apart from trailing padding, which
/// may have been trimmed).
#[derive(Debug)]
#[must_use]
pub enum LroResult {
    /// The frame now belongs to the engine.
    Aggregated,

    /// The frame is not something the engine aggregates, or there is
    /// no room for a new flow.
    NotHandled(MsgBlk),

    /// The frame is malformed, failed its IP header checksum, or broke
    /// the sequence of an existing aggregate. In the last case the
    /// aggregate has already been flushed.
    Invalid(MsgBlk),
}

impl LroResult {
    pub fn is_aggregated(&self) -> bool {
        matches!(self, Self::Aggregated)
    }

    /// Take back the declined frame, if any.
    pub fn into_pkt(self) -> Option<MsgBlk> {
        match self {
            Self::Aggregated => None,
            Self::NotHandled(pkt) | Self::Invalid(pkt) => Some(pkt),
        }
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum LroError {
    #[error("no LRO entries could be allocated")]
    OutOfMemory,

    #[error("failed to register LRO stats: {0}")]
    KStat(#[from] kstat::Error),
}

/// The upward delivery path of flushed aggregates.
///
/// Ownership of the chain passes to the implementor.
pub trait Deliver {
    fn deliver(&mut self, pkt: MsgBlk);
}

impl<F: FnMut(MsgBlk)> Deliver for F {
    fn deliver(&mut self, pkt: MsgBlk) {
        self(pkt)
    }
}

impl Deliver for Vec<MsgBlk> {
    fn deliver(&mut self, pkt: MsgBlk) {
        self.push(pkt);
    }
}

impl Deliver for MsgBlkChain {
    fn deliver(&mut self, pkt: MsgBlk) {
        self.append(pkt);
    }
}

/// The interface a controller is attached to.
///
/// Shared with the driver, which may change the MTU at any time; the
/// controller reads it whenever it checks the aggregate size.
#[derive(Debug)]
pub struct Interface {
    name: String,
    mtu: AtomicU32,
}

impl Interface {
    pub fn new(name: impl Into<String>, mtu: u32) -> Self {
        Self { name: name.into(), mtu: AtomicU32::new(mtu) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u32 {
        self.mtu.load(Ordering::Relaxed)
    }

    pub fn set_mtu(&self, mtu: u32) {
        self.mtu.store(mtu, Ordering::Relaxed);
    }
}

#[derive(KStatProvider)]
pub struct LroStats {
    /// Frames whose IPv4 header checksum did not verify.
    pub bad_csum: KStatU64,
    /// Frames handed upward through flushes, counting every segment
    /// merged into an aggregate.
    pub queued: KStatU64,
    /// Aggregates flushed.
    pub flushed: KStatU64,
}

/// One in-progress aggregate.
#[derive(Debug, Default)]
pub struct LroEntry {
    pub flow: LroFlowId,
    /// The sequence number one past the last merged payload byte.
    pub next_seq: u32,
    /// Segments merged after the first.
    pub append_cnt: u32,
    /// Length of the aggregate frame, Ethernet header included.
    pub len: usize,
    pub ack: u32,
    pub window: u16,
    /// Present iff the first segment carried a timestamp block.
    pub ts: Option<TcpTimestamp>,
    pub data_csum: u16,
    pkt: Option<MsgBlk>,
}

impl LroEntry {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// The number of bytes in the aggregate chain.
    pub fn chain_len(&self) -> usize {
        self.pkt.as_ref().map(|pkt| pkt.byte_len()).unwrap_or(0)
    }
}

/// The LRO controller of one interface.
pub struct LroCtrl<D: Deliver> {
    ifp: Arc<Interface>,
    pool: LroPool,
    stats: KStatNamed<LroStats>,
    deliver: D,
    log: Box<dyn LogProvider>,
}

impl<D: Deliver> LroCtrl<D> {
    /// Create a controller with `cfg.max_entries` entries.
    ///
    /// If memory is short the pool may come up with fewer entries than
    /// requested; this is logged, and [`LroCtrl::capacity`] reflects
    /// what was obtained. Failing to allocate even one entry is an
    /// error.
    pub fn new(
        cfg: LroCfg,
        ifp: Arc<Interface>,
        deliver: D,
        log: Box<dyn LogProvider>,
    ) -> Result<Self, LroError> {
        let want = cfg.max_entries as usize;
        let pool = LroPool::new(want)?;
        if pool.capacity() < want {
            log.log(
                LogLevel::Warn,
                &format!(
                    "{}: LRO pool reduced to {} of {} entries",
                    ifp.name(),
                    pool.capacity(),
                    want
                ),
            );
        }

        let stats =
            KStatNamed::new(LRO_KSTAT_MODULE, ifp.name(), LroStats::new())?;

        Ok(Self { ifp, pool, stats, deliver, log })
    }

    /// Tear down the controller, returning the delivery collaborator.
    ///
    /// Every aggregate should have been flushed beforehand. Any which
    /// remain are logged and their chains dropped without delivery.
    pub fn free(self) -> D {
        let Self { ifp, mut pool, log, deliver, .. } = self;

        let active = pool.num_active();
        if active > 0 {
            log.log(
                LogLevel::Error,
                &format!(
                    "{}: {} LRO entries active at teardown",
                    ifp.name(),
                    active
                ),
            );

            for entry in pool.active_entries() {
                log.log(
                    LogLevel::Error,
                    &format!(
                        "{}: dropping aggregate {} ({} segments, {} bytes)",
                        ifp.name(),
                        entry.flow,
                        entry.append_cnt + 1,
                        entry.len
                    ),
                );
            }

            pool.discard_active();
        }

        deliver
    }

    /// The number of entries in the pool.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn num_free(&self) -> usize {
        self.pool.num_free()
    }

    pub fn num_active(&self) -> usize {
        self.pool.num_active()
    }

    /// The flows currently being aggregated, most recent first.
    pub fn active_flows(&self) -> impl Iterator<Item = LroFlowId> + '_ {
        self.pool.active_entries().map(|entry| entry.flow)
    }

    /// Look up the aggregate of `flow`, if one is in progress.
    pub fn entry(&self, flow: &LroFlowId) -> Option<&LroEntry> {
        self.pool.find(flow).map(|idx| self.pool.entry(idx))
    }

    pub fn stats(&self) -> LroStatsSnap {
        self.stats.vals.snapshot()
    }

    pub fn deliver_mut(&mut self) -> &mut D {
        &mut self.deliver
    }

    /// The largest aggregate, Ethernet header included, which is held
    /// without flushing.
    fn max_aggr_len(&self) -> usize {
        super::ip4::IPV4_MAX_LEN.saturating_sub(self.ifp.mtu() as usize)
    }
}

fn flush_probe(flow: &LroFlowId, append_cnt: u32, len: usize) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let flow_s = flow.to_string();
            crate::lro_provider::lro__flush!(
                || (flow_s, u64::from(append_cnt), len as u64)
            );
        } else {
            let (..) = (flow, append_cnt, len);
        }
    }
}

fn decline_probe(flow: &LroFlowId, reason: &'static str) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let flow_s = flow.to_string();
            crate::lro_provider::lro__decline!(|| (flow_s, reason));
        } else {
            let (..) = (flow, reason);
        }
    }
}
