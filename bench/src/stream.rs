// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Synthetic receive bursts.

use lro_test_utils::*;
use rand::Rng;

/// One frame of a burst, along with the partial checksum a NIC would
/// have reported for it.
pub struct RxFrame {
    pub bytes: Vec<u8>,
    pub hw_csum: u16,
}

/// The shape of a receive burst.
#[derive(Clone, Copy, Debug)]
pub struct Burst {
    /// Number of distinct flows.
    pub flows: u16,
    /// Segments per flow.
    pub segs: usize,
    /// TCP payload bytes per segment.
    pub mss: usize,
    /// Carry a timestamp block in every segment.
    pub ts: bool,
}

impl Burst {
    pub fn label(&self) -> String {
        format!(
            "{}x{}x{}{}",
            self.flows,
            self.segs,
            self.mss,
            if self.ts { "-ts" } else { "" }
        )
    }

    pub fn frames(&self) -> usize {
        usize::from(self.flows) * self.segs
    }

    /// Generate the burst, with the flows' segments interleaved
    /// round-robin as they would arrive from a busy link.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Vec<RxFrame> {
        let mut segs: Vec<TcpSeg> = (0..self.flows)
            .map(|i| {
                let seg = TcpSeg::new(flow(10_000 + i), rng.random());
                if self.ts {
                    seg.ts(rng.random_range(1..1 << 30), 1)
                } else {
                    seg
                }
            })
            .collect();

        let mut out = Vec::with_capacity(self.frames());
        for _ in 0..self.segs {
            for seg in segs.iter_mut() {
                let bytes = seg.build(&random_payload(rng, self.mss));
                let hw_csum = hw_csum(&bytes);
                out.push(RxFrame { bytes, hw_csum });

                *seg = seg.next(self.mss);
                if let Some(ts) = seg.ts {
                    *seg = seg.ts(ts.val + 1, ts.ecr);
                }
            }
        }

        out
    }
}

/// Copy a burst into fresh [`MsgBlk`]s, ready to hand to the engine.
pub fn to_mblks(frames: &[RxFrame]) -> Vec<(MsgBlk, u16)> {
    frames
        .iter()
        .map(|f| (MsgBlk::copy(&f.bytes), f.hw_csum))
        .collect()
}
