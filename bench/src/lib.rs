// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::measurement::Measurement;
use criterion::measurement::WallTime;

#[cfg(feature = "alloc")]
pub mod alloc;
pub mod stream;

/// Additional labelling information for [`Measurement`]s, used to name
/// benchmark groups.
pub trait MeasurementInfo: Measurement {
    fn label() -> &'static str;
}

impl MeasurementInfo for WallTime {
    fn label() -> &'static str {
        "wallclock"
    }
}
