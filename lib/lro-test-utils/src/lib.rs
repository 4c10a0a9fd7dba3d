// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests and benchmarks.
//!
//! Frames are built by hand with correct IPv4 and TCP checksums, so
//! that they can serve both as input to the engine and as the expected
//! result of coalescing. smoltcp's wire types are used as an
//! independent check of the engine's output.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use rand::Rng;
use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::TcpPacket;
use std::sync::Arc;

// Let's make our lives easier and pub use a bunch of stuff.
pub use std::net::Ipv4Addr;
pub use tcp_lro::cfg::LroCfg;
pub use tcp_lro::ddi::mblk::MblkOffloadFlags;
pub use tcp_lro::ddi::mblk::MsgBlk;
pub use tcp_lro::engine::checksum::Checksum;
pub use tcp_lro::engine::ether::ETHER_HDR_LEN;
pub use tcp_lro::engine::ip4::IPV4_HDR_LEN;
pub use tcp_lro::engine::lro::Deliver;
pub use tcp_lro::engine::lro::Interface;
pub use tcp_lro::engine::lro::LroCtrl;
pub use tcp_lro::engine::lro::LroEntry;
pub use tcp_lro::engine::lro::LroError;
pub use tcp_lro::engine::lro::LroResult;
pub use tcp_lro::engine::lro::LroStatsSnap;
pub use tcp_lro::engine::packet::LroFlowId;
pub use tcp_lro::engine::tcp::TCP_HDR_SZ;
pub use tcp_lro::engine::tcp::TcpFlags;
pub use tcp_lro::engine::tcp::TcpTimestamp;
pub use tcp_lro::provider::PrintlnLog;

pub const CLIENT_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xF7, 0x00, 0x01];
pub const SERVER_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0xF7, 0x00, 0x02];
pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const SERVER_PORT: u16 = 80;

pub const DEF_MTU: u32 = 1500;

/// The length of every header in front of the payload of a frame
/// built without TCP options.
pub const HDRS_LEN: usize = ETHER_HDR_LEN + IPV4_HDR_LEN + TCP_HDR_SZ;

/// A client-to-server flow using `src_port`.
pub fn flow(src_port: u16) -> LroFlowId {
    LroFlowId {
        src: CLIENT_IP,
        dst: SERVER_IP,
        src_port,
        dst_port: SERVER_PORT,
    }
}

/// A controller delivering into a `Vec`, with `max` entries on an
/// interface with the given MTU.
pub fn lro_ctrl(max: u32, mtu: u32) -> LroCtrl<Vec<MsgBlk>> {
    LroCtrl::new(
        LroCfg::with_max_entries(max),
        Arc::new(Interface::new("lro0", mtu)),
        Vec::new(),
        Box::new(PrintlnLog),
    )
    .unwrap()
}

/// The TCP header fields of a segment, and everything else needed to
/// build it as an Ethernet frame.
#[derive(Clone, Copy, Debug)]
pub struct TcpSeg {
    pub flow: LroFlowId,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub flags: u8,
    pub ts: Option<TcpTimestamp>,
    pub ip_id: u16,
}

impl TcpSeg {
    pub fn new(flow: LroFlowId, seq: u32) -> Self {
        Self {
            flow,
            seq,
            ack: 1,
            window: 4096,
            flags: TcpFlags::ACK,
            ts: None,
            ip_id: 0x1DE0,
        }
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn ts(mut self, val: u32, ecr: u32) -> Self {
        self.ts = Some(TcpTimestamp { val, ecr });
        self
    }

    /// The segment that follows this one once `len` payload bytes
    /// have been sent.
    pub fn next(mut self, len: usize) -> Self {
        self.seq = self.seq.wrapping_add(len as u32);
        self
    }

    pub fn tcp_hdr_len(&self) -> usize {
        TCP_HDR_SZ + if self.ts.is_some() { 12 } else { 0 }
    }

    pub fn hdrs_len(&self) -> usize {
        ETHER_HDR_LEN + IPV4_HDR_LEN + self.tcp_hdr_len()
    }

    /// Build the frame carrying `payload`, with valid IPv4 and TCP
    /// checksums.
    pub fn build(&self, payload: &[u8]) -> Vec<u8> {
        let tcp_len = self.tcp_hdr_len() + payload.len();
        let ip_len = IPV4_HDR_LEN + tcp_len;
        let mut frame = Vec::with_capacity(ETHER_HDR_LEN + ip_len);

        frame.extend_from_slice(&SERVER_MAC);
        frame.extend_from_slice(&CLIENT_MAC);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());

        let mut ip = [0u8; IPV4_HDR_LEN];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(ip_len as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&self.ip_id.to_be_bytes());
        // Don't fragment.
        ip[6] = 0x40;
        ip[8] = 64;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&self.flow.src.octets());
        ip[16..20].copy_from_slice(&self.flow.dst.octets());
        let csum = !Checksum::compute(&ip).finalize();
        ip[10..12].copy_from_slice(&csum.to_ne_bytes());
        frame.extend_from_slice(&ip);

        let tcp_start = frame.len();
        frame.extend_from_slice(&self.flow.src_port.to_be_bytes());
        frame.extend_from_slice(&self.flow.dst_port.to_be_bytes());
        frame.extend_from_slice(&self.seq.to_be_bytes());
        frame.extend_from_slice(&self.ack.to_be_bytes());
        frame.push(((self.tcp_hdr_len() / 4) as u8) << 4);
        frame.push(self.flags);
        frame.extend_from_slice(&self.window.to_be_bytes());
        frame.extend_from_slice(&[0; 4]);
        if let Some(ts) = self.ts {
            frame.extend_from_slice(&[1, 1, 8, 10]);
            frame.extend_from_slice(&ts.val.to_be_bytes());
            frame.extend_from_slice(&ts.ecr.to_be_bytes());
        }
        frame.extend_from_slice(payload);

        let mut sum = Checksum::compute(&ip[12..20]);
        sum.add_bytes(&[0, 6]);
        sum.add_bytes(&(tcp_len as u16).to_be_bytes());
        sum.add_bytes(&frame[tcp_start..]);
        let csum = !sum.finalize();
        frame[tcp_start + 16..tcp_start + 18]
            .copy_from_slice(&csum.to_ne_bytes());

        frame
    }

    pub fn mblk(&self, payload: &[u8]) -> MsgBlk {
        MsgBlk::from_vec(self.build(payload))
    }
}

/// The partial checksum a NIC would supply for `frame`: the
/// uncomplemented sum over the IPv4 header and TCP segment.
pub fn hw_csum(frame: &[u8]) -> u16 {
    Checksum::compute(&frame[ETHER_HDR_LEN..]).finalize()
}

/// Split `frame` into a multi-segment [`MsgBlk`] at the given offsets.
pub fn split_mblk(frame: &[u8], at: &[usize]) -> MsgBlk {
    let mut bounds = vec![0];
    bounds.extend_from_slice(at);
    bounds.push(frame.len());
    MsgBlk::from_segments(bounds.windows(2).map(|w| &frame[w[0]..w[1]]))
        .unwrap()
}

/// The frame a peer would have sent had it transmitted the payloads
/// of `first` and every later segment as one: the headers of `first`
/// with the ACK, window, and timestamp of `last`.
pub fn coalesced(first: &TcpSeg, last: &TcpSeg, payload: &[u8]) -> Vec<u8> {
    let mut seg = *first;
    seg.ack = last.ack;
    seg.window = last.window;
    if seg.ts.is_some() {
        seg.ts = last.ts;
    }
    seg.build(payload)
}

pub fn random_payload<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rng.fill(&mut payload[..]);
    payload
}

/// What smoltcp makes of a frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Parsed {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub payload: Vec<u8>,
}

/// Parse `frame` with smoltcp, asserting that both the IPv4 header
/// checksum and the TCP checksum verify.
pub fn verify_frame(frame: &[u8]) -> Parsed {
    let eth = EthernetFrame::new_checked(frame).expect("bad ethernet frame");
    assert_eq!(eth.ethertype(), EthernetProtocol::Ipv4);

    let ip = Ipv4Packet::new_checked(eth.payload()).expect("bad IPv4 packet");
    assert!(ip.verify_checksum(), "IPv4 header checksum");
    assert_eq!(ip.next_header(), IpProtocol::Tcp);

    let src = IpAddress::Ipv4(ip.src_addr());
    let dst = IpAddress::Ipv4(ip.dst_addr());
    let tcp = TcpPacket::new_checked(ip.payload()).expect("bad TCP segment");
    assert!(tcp.verify_checksum(&src, &dst), "TCP checksum");

    Parsed {
        src: Ipv4Addr::from(ip.src_addr().0),
        dst: Ipv4Addr::from(ip.dst_addr().0),
        src_port: tcp.src_port(),
        dst_port: tcp.dst_port(),
        seq: tcp.seq_number().0 as u32,
        ack: tcp.ack_number().0 as u32,
        window: tcp.window_len(),
        payload: tcp.payload().to_vec(),
    }
}
