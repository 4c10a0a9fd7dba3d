// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Abstractions over the driver-facing data structures: packet buffer
//! chains and named statistics.
pub mod kstat;
pub mod mblk;
