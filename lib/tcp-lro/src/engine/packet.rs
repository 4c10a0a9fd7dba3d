// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared by the header views and the buffer chain: the flow
//! identifier and the read/write error types.

use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use thiserror::Error;

/// The flow identifier of an aggregation entry.
///
/// Only IPv4/TCP is aggregated, so the protocol is implied and the
/// identifier is the 4-tuple. Matching is exact on every field.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LroFlowId {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl LroFlowId {
    pub const ANY: Self = Self {
        src: Ipv4Addr::UNSPECIFIED,
        dst: Ipv4Addr::UNSPECIFIED,
        src_port: 0,
        dst_port: 0,
    };
}

impl Default for LroFlowId {
    fn default() -> Self {
        Self::ANY
    }
}

impl Display for LroFlowId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP:{}:{}:{}:{}",
            self.src, self.src_port, self.dst, self.dst_port
        )
    }
}

/// An error reading a header out of a packet buffer.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ReadErr {
    #[error("bad header layout")]
    BadLayout,
    #[error("not enough bytes: {available} available, {needed} needed")]
    NotEnoughBytes { available: usize, needed: usize },
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum WriteError {
    #[error("not enough bytes: {available} available, {needed} needed")]
    NotEnoughBytes { available: usize, needed: usize },
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum SegAdjustError {
    /// Attempt to move the start of the readable area of the segment
    /// past its end.
    #[error("segment start past segment end")]
    StartPastEnd,
}
