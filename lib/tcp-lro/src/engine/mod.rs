// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The LRO engine: checksum arithmetic, header views, and the
//! aggregation controller built on top of them.

pub mod checksum;
pub mod ether;
pub mod ip4;
pub mod lro;
pub mod packet;
pub mod tcp;
