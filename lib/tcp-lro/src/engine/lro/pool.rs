// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The entry pool.
//!
//! Entries are addressed by their slot index. Every index is in
//! exactly one of `free` and `active` at any time.

use super::LroEntry;
use super::LroError;
use crate::engine::packet::LroFlowId;
use alloc::vec::Vec;

pub(super) struct LroPool {
    slots: Vec<LroEntry>,
    free: Vec<usize>,
    active: Vec<usize>,
}

impl LroPool {
    pub(super) fn new(max: usize) -> Result<Self, LroError> {
        Self::with_alloc(max, Self::try_alloc)
    }

    /// Allocate up to `max` entries with `alloc`, halving the request
    /// each time it fails.
    fn with_alloc<F>(max: usize, mut alloc: F) -> Result<Self, LroError>
    where
        F: FnMut(usize) -> Option<Self>,
    {
        let mut want = max;
        while want > 0 {
            if let Some(pool) = alloc(want) {
                return Ok(pool);
            }
            want /= 2;
        }

        Err(LroError::OutOfMemory)
    }

    fn try_alloc(n: usize) -> Option<Self> {
        let mut slots = Vec::new();
        let mut free = Vec::new();
        let mut active = Vec::new();
        slots.try_reserve_exact(n).ok()?;
        free.try_reserve_exact(n).ok()?;
        active.try_reserve_exact(n).ok()?;

        slots.extend((0..n).map(|_| LroEntry::default()));
        // Slot 0 is handed out first.
        free.extend((0..n).rev());
        Some(Self { slots, free, active })
    }

    pub(super) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn num_free(&self) -> usize {
        self.free.len()
    }

    pub(super) fn num_active(&self) -> usize {
        self.active.len()
    }

    pub(super) fn entry(&self, idx: usize) -> &LroEntry {
        &self.slots[idx]
    }

    pub(super) fn entry_mut(&mut self, idx: usize) -> &mut LroEntry {
        &mut self.slots[idx]
    }

    /// The active entries, most recently activated first.
    pub(super) fn active_entries(&self) -> impl Iterator<Item = &LroEntry> {
        self.active.iter().rev().map(|&idx| &self.slots[idx])
    }

    /// Find the active entry of `flow`.
    pub(super) fn find(&self, flow: &LroFlowId) -> Option<usize> {
        self.active.iter().copied().find(|&idx| self.slots[idx].flow == *flow)
    }

    /// Move a free entry to the active set.
    pub(super) fn activate(&mut self) -> Option<usize> {
        let idx = self.free.pop()?;
        self.active.push(idx);
        Some(idx)
    }

    /// Remove `idx` from the active set. The entry keeps its state
    /// until it is released.
    pub(super) fn deactivate(&mut self, idx: usize) {
        if let Some(pos) = self.active.iter().position(|&i| i == idx) {
            self.active.remove(pos);
        }
    }

    /// Remove the most recently activated entry from the active set.
    pub(super) fn pop_active(&mut self) -> Option<usize> {
        self.active.pop()
    }

    /// Reset an inactive entry and return it to the free set.
    pub(super) fn release(&mut self, idx: usize) {
        debug_assert!(!self.active.contains(&idx));
        debug_assert!(!self.free.contains(&idx));
        self.slots[idx].reset();
        self.free.push(idx);
    }

    /// Release every active entry, dropping its chain.
    pub(super) fn discard_active(&mut self) {
        while let Some(idx) = self.pop_active() {
            self.release(idx);
        }
    }
}
