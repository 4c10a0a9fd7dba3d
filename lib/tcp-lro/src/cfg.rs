// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! LRO controller configuration.

use serde::Deserialize;
use serde::Serialize;

/// The default number of aggregation entries per controller.
pub const LRO_DEF_ENTRIES: u32 = 8;

/// The configuration of a single [`LroCtrl`].
///
/// [`LroCtrl`]: crate::engine::lro::LroCtrl
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LroCfg {
    /// The number of flows which may be aggregated at once. This is
    /// the capacity of the entry pool and never grows after
    /// construction.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

fn default_max_entries() -> u32 {
    LRO_DEF_ENTRIES
}

impl Default for LroCfg {
    fn default() -> Self {
        Self { max_entries: LRO_DEF_ENTRIES }
    }
}

impl LroCfg {
    pub fn with_max_entries(max_entries: u32) -> Self {
        Self { max_entries }
    }
}
