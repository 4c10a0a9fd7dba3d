// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet buffers.
//!
//! A [`MsgBlk`] is a single frame stored as a chain of data segments,
//! in the manner of an illumos `mblk_t` linked through `b_cont` (or a
//! BSD `mbuf` linked through `m_next`). Each segment owns its backing
//! buffer and tracks a read/write window into it, so headers can be
//! trimmed from the front and trailing padding trimmed from the back
//! without copying. Splicing two frames together is a matter of moving
//! segments from one chain to the other.
//!
//! A [`MsgBlkChain`] is a list of whole frames (`b_next`), used to
//! hand batches of packets between the engine and its caller.

use crate::engine::packet::SegAdjustError;
use crate::engine::packet::WriteError;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::ops::Deref;
use core::ops::DerefMut;
use core::slice;

bitflags! {
/// Flags which denote the receive-side checksum state of a [`MsgBlk`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MblkOffloadFlags: u16 {
    /// Rx: IPv4 header checksum was verified correct.
    const HCK_IPV4_HDRCKSUM_OK = 1 << 0;
    /// Rx: Partial checksum computed and attached.
    const HCK_PARTIALCKSUM = 1 << 1;
    /// Rx: Full checksum was computed, and is attached.
    const HCK_FULLCKSUM = 1 << 2;
    /// Rx: L3/L4 checksums are known to be correct; consumers need
    /// not verify them again.
    const HCK_FULLCKSUM_OK = 1 << 3;

    const HCK_FLAGS = Self::HCK_IPV4_HDRCKSUM_OK.bits() |
        Self::HCK_PARTIALCKSUM.bits() | Self::HCK_FULLCKSUM.bits() |
        Self::HCK_FULLCKSUM_OK.bits();
}
}

/// A list of whole packets.
///
/// Network packets are handed between a driver and the stack as a
/// list of [`MsgBlk`]s. This is the owned equivalent of a `b_next`
/// linked list of `mblk_t`.
#[derive(Debug, Default)]
pub struct MsgBlkChain(VecDeque<MsgBlk>);

impl MsgBlkChain {
    /// Create an empty packet chain.
    pub fn empty() -> Self {
        Self(VecDeque::new())
    }

    /// Removes the next packet from the top of the chain and returns
    /// it, taking ownership.
    pub fn pop_front(&mut self) -> Option<MsgBlk> {
        self.0.pop_front()
    }

    /// Adds an owned `MsgBlk` to the end of this chain.
    pub fn append(&mut self, packet: MsgBlk) {
        self.0.push_back(packet);
    }

    /// Return the number of packets in this chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a shared cursor over all packets in this chain.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &MsgBlk> {
        self.0.iter()
    }
}

impl Iterator for MsgBlkChain {
    type Item = MsgBlk;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop_front()
    }
}

/// A single packet -- a bytestream comprised of a list of data
/// segments.
///
/// The first segment is the one headers are parsed from and
/// rewritten in; `Deref` gives access to its readable bytes.
#[derive(Debug)]
pub struct MsgBlk {
    segs: Vec<MsgBlkNode>,
    cksum: MblkOffloadFlags,
}

impl Deref for MsgBlk {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.segs[0]
    }
}

impl DerefMut for MsgBlk {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.segs[0]
    }
}

impl MsgBlk {
    /// Allocate a new [`MsgBlk`] containing a data buffer of `len`
    /// bytes.
    ///
    /// The returned packet consists of exactly one segment, with zero
    /// readable bytes and `len` bytes of tail capacity.
    pub fn new(len: usize) -> Self {
        Self::from_node(MsgBlkNode::new(len))
    }

    /// Allocates a new [`MsgBlk`] of size `buf.len()`, copying its
    /// contents.
    pub fn copy(buf: impl AsRef<[u8]>) -> Self {
        let buf = buf.as_ref();
        let mut out = Self::new(buf.len());
        // Unwrap safety -- just allocated length of input buffer.
        out.write_bytes_back(buf).unwrap();
        out
    }

    /// Wrap an existing buffer as a single-segment [`MsgBlk`] without
    /// copying. All bytes of `buf` are readable.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let wptr = buf.len();
        Self::from_node(MsgBlkNode {
            buf: buf.into_boxed_slice(),
            rptr: 0,
            wptr,
        })
    }

    /// Build a multi-segment [`MsgBlk`], one segment per input slice.
    ///
    /// Returns `None` if `bufs` is empty.
    pub fn from_segments<I, B>(bufs: I) -> Option<Self>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut iter = bufs.into_iter();
        let mut out = Self::copy(iter.next()?);
        for buf in iter {
            out.append(Self::copy(buf));
        }
        Some(out)
    }

    fn from_node(node: MsgBlkNode) -> Self {
        Self { segs: vec![node], cksum: MblkOffloadFlags::empty() }
    }

    /// Return the number of initialised bytes in this `MsgBlk` over
    /// all linked segments.
    pub fn byte_len(&self) -> usize {
        self.segs.iter().map(|v| v.len()).sum()
    }

    /// Return the number of segments in this `MsgBlk`.
    pub fn seg_len(&self) -> usize {
        self.segs.len()
    }

    /// Truncates an `MsgBlk` chain, dropping any elements such that
    /// it contains at most `len` bytes.
    ///
    /// The first segment is always kept, even if it ends up empty.
    pub fn truncate_chain(&mut self, len: usize) {
        let mut seen = 0;
        let mut keep = self.segs.len();

        for (i, seg) in self.segs.iter_mut().enumerate() {
            let seg_len = seg.len();
            let seen_til_now = seen;
            seen += seg_len;

            if seen >= len {
                let to_keep = len.saturating_sub(seen_til_now);
                seg.wptr = seg.rptr + to_keep;
                keep = i + 1;
                break;
            }
        }

        self.segs.truncate(keep);
    }

    /// Shrink the readable area of the first segment by shifting its
    /// read pointer by `n`; effectively removing bytes from the start
    /// of the packet.
    ///
    /// # Errors
    ///
    /// `SegAdjustError::StartPastEnd`: Shifting the read pointer by
    /// `n` would move it past the write pointer.
    pub fn drop_front_bytes(&mut self, n: usize) -> Result<(), SegAdjustError> {
        self.segs[0].drop_front_bytes(n)
    }

    /// Copies a byte slice into the region after any bytes present in
    /// the first segment.
    pub fn write_bytes_back(
        &mut self,
        bytes: impl AsRef<[u8]>,
    ) -> Result<(), WriteError> {
        let bytes = bytes.as_ref();
        let node = &mut self.segs[0];
        let avail = node.buf.len() - node.wptr;
        if avail < bytes.len() {
            return Err(WriteError::NotEnoughBytes {
                available: avail,
                needed: bytes.len(),
            });
        }
        node.buf[node.wptr..node.wptr + bytes.len()].copy_from_slice(bytes);
        node.wptr += bytes.len();
        Ok(())
    }

    /// Places another `MsgBlk` at the end of this packet's segment
    /// chain. The checksum state of `other` is discarded.
    pub fn append(&mut self, other: Self) {
        self.segs.extend(other.segs);
    }

    /// Make sure the first `len` bytes of the packet are contiguous
    /// in the first segment, copying them forward from later segments
    /// if needed.
    ///
    /// # Errors
    ///
    /// `WriteError::NotEnoughBytes`: the packet holds fewer than `len`
    /// bytes in total.
    pub fn pullup(&mut self, len: usize) -> Result<(), WriteError> {
        if self.segs[0].len() >= len {
            return Ok(());
        }

        let total = self.byte_len();
        if total < len {
            return Err(WriteError::NotEnoughBytes {
                available: total,
                needed: len,
            });
        }

        let mut head = MsgBlkNode::new(len);
        let mut needed = len;
        for seg in self.segs.iter_mut() {
            let n = needed.min(seg.len());
            head.buf[head.wptr..head.wptr + n].copy_from_slice(&seg[..n]);
            head.wptr += n;
            seg.rptr += n;
            needed -= n;
            if needed == 0 {
                break;
            }
        }

        self.segs.retain(|seg| !seg.is_empty());
        self.segs.insert(0, head);
        Ok(())
    }

    /// Returns a shared cursor over all segments in this `MsgBlk`.
    pub fn iter(&self) -> MsgBlkIter<'_> {
        MsgBlkIter { inner: self.segs.iter() }
    }

    /// Copy out all bytes within this mblk and its successors
    /// to a single contiguous buffer.
    pub fn copy_all(&self) -> Vec<u8> {
        let len = self.byte_len();
        let mut out = Vec::with_capacity(len);

        for node in self.iter() {
            out.extend_from_slice(node)
        }

        out
    }

    /// Drops all empty segments from this chain, keeping at least one
    /// segment.
    pub fn drop_empty_segments(&mut self) {
        // Zero-length continuations upset consumers which walk the
        // chain expecting data in every segment.
        if self.segs.iter().all(|seg| seg.is_empty()) {
            self.segs.truncate(1);
            return;
        }

        self.segs.retain(|seg| !seg.is_empty());
    }

    /// Return the checksum state attached to this packet.
    pub fn cksum_flags(&self) -> MblkOffloadFlags {
        self.cksum
    }

    /// Replace the checksum state attached to this packet.
    pub fn set_cksum_flags(&mut self, flags: MblkOffloadFlags) {
        self.cksum = flags & MblkOffloadFlags::HCK_FLAGS;
    }
}

/// One data segment of an [`MsgBlk`]'s chain, accessed via iterator.
///
/// This supports a reduced set of operations compared to [`MsgBlk`],
/// primarily to allow (mutable) access to the inner bytes while
/// preventing the chain itself from being restructured.
#[derive(Debug)]
pub struct MsgBlkNode {
    buf: Box<[u8]>,
    rptr: usize,
    wptr: usize,
}

impl Deref for MsgBlkNode {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf[self.rptr..self.wptr]
    }
}

impl DerefMut for MsgBlkNode {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf[self.rptr..self.wptr]
    }
}

impl MsgBlkNode {
    fn new(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity].into_boxed_slice(), rptr: 0, wptr: 0 }
    }

    /// Shrink the readable area of this segment by shifting its read
    /// pointer by `n`.
    pub fn drop_front_bytes(&mut self, n: usize) -> Result<(), SegAdjustError> {
        if self.wptr - self.rptr < n {
            return Err(SegAdjustError::StartPastEnd);
        }

        self.rptr += n;
        Ok(())
    }
}

pub struct MsgBlkIter<'a> {
    inner: slice::Iter<'a, MsgBlkNode>,
}

impl<'a> Iterator for MsgBlkIter<'a> {
    type Item = &'a MsgBlkNode;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for MsgBlkIter<'_> {}
