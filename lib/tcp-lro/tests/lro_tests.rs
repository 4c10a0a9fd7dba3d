// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests of the LRO engine.
//!
//! Every flushed aggregate is checked two ways: byte-for-byte against
//! the frame a peer would have sent had it transmitted the merged
//! payloads in one segment, and with smoltcp's checksum verification.

use lro_test_utils::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn rx_frame(
    ctrl: &mut LroCtrl<Vec<MsgBlk>>,
    frame: &[u8],
    use_hw: bool,
) -> LroResult {
    let hw = if use_hw { hw_csum(frame) } else { 0 };
    ctrl.rx(MsgBlk::copy(frame), hw)
}

fn assert_conserved(ctrl: &LroCtrl<Vec<MsgBlk>>) {
    assert_eq!(ctrl.num_free() + ctrl.num_active(), ctrl.capacity());
}

// Two in-order 100-byte segments with increasing timestamps coalesce
// into a single frame identical to one carrying both payloads.
#[test]
fn two_segments_with_timestamps() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let mut rng = StdRng::seed_from_u64(0xA);
    let p1 = random_payload(&mut rng, 100);
    let p2 = random_payload(&mut rng, 100);

    let s1 = TcpSeg::new(flow(49154), 5000).ack(77).ts(1000, 44);
    let s2 = s1.next(100).ack(78).window(8192).ts(1001, 45);

    let f1 = s1.build(&p1);
    let f2 = s2.build(&p2);
    assert!(rx_frame(&mut ctrl, &f1, true).is_aggregated());
    assert!(rx_frame(&mut ctrl, &f2, true).is_aggregated());

    let entry = ctrl.entry(&flow(49154)).unwrap();
    assert_eq!(entry.append_cnt, 1);
    assert_eq!(entry.next_seq, 5200);
    assert_eq!(entry.ts, Some(TcpTimestamp { val: 1001, ecr: 45 }));
    assert_eq!(ctrl.num_active(), 1);

    ctrl.flush_all();
    assert_conserved(&ctrl);
    let stats = ctrl.stats();
    assert_eq!(stats.flushed, 1);
    assert_eq!(stats.queued, 2);

    let out = ctrl.free();
    assert_eq!(out.len(), 1);
    let bytes = out[0].copy_all();

    let mut payload = p1.clone();
    payload.extend_from_slice(&p2);
    assert_eq!(bytes, coalesced(&s1, &s2, &payload));

    let parsed = verify_frame(&bytes);
    assert_eq!(parsed.seq, 5000);
    assert_eq!(parsed.ack, 78);
    assert_eq!(parsed.window, 8192);
    assert_eq!(parsed.payload, payload);
}

// A segment 50 bytes past the expected sequence number flushes the
// aggregate, which holds only the data already merged.
#[test]
fn gap_flushes_and_declines() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(49154), 1);
    let s2 = s1.next(64);
    let gap = s2.next(64 + 50);

    assert!(rx_frame(&mut ctrl, &s1.build(&[1; 64]), true).is_aggregated());
    assert!(rx_frame(&mut ctrl, &s2.build(&[2; 64]), true).is_aggregated());

    let gap_frame = gap.build(&[3; 64]);
    match rx_frame(&mut ctrl, &gap_frame, true) {
        LroResult::Invalid(pkt) => assert_eq!(pkt.copy_all(), gap_frame),
        res => panic!("expected Invalid, got {res:?}"),
    }

    assert!(ctrl.entry(&flow(49154)).is_none());
    assert_conserved(&ctrl);

    let out = ctrl.free();
    assert_eq!(out.len(), 1);
    let mut payload = vec![1u8; 64];
    payload.extend_from_slice(&[2; 64]);
    assert_eq!(out[0].copy_all(), coalesced(&s1, &s2, &payload));
}

// A retransmission (sequence number behind the aggregate) is handled
// the same way as a gap.
#[test]
fn retransmit_flushes_and_declines() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(2000), 100);

    assert!(rx_frame(&mut ctrl, &s1.build(&[1; 10]), true).is_aggregated());
    let res = rx_frame(&mut ctrl, &s1.build(&[1; 10]), true);
    assert!(matches!(res, LroResult::Invalid(_)));
    assert_eq!(ctrl.num_active(), 0);
    assert_eq!(ctrl.stats().flushed, 1);
}

// Control segments are not touched.
#[test]
fn rst_not_handled() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(49154), 1);
    assert!(rx_frame(&mut ctrl, &s1.build(&[1; 10]), true).is_aggregated());

    for flags in [
        TcpFlags::RST,
        TcpFlags::ACK | TcpFlags::RST,
        TcpFlags::ACK | TcpFlags::FIN,
        TcpFlags::ACK | TcpFlags::SYN,
        TcpFlags::ACK | TcpFlags::URG,
        TcpFlags::ACK | TcpFlags::ECE,
    ] {
        let frame = s1.next(10).flags(flags).build(&[2; 10]);
        match rx_frame(&mut ctrl, &frame, true) {
            LroResult::NotHandled(pkt) => assert_eq!(pkt.copy_all(), frame),
            res => panic!("expected NotHandled, got {res:?}"),
        }
    }

    let entry = ctrl.entry(&flow(49154)).unwrap();
    assert_eq!(entry.append_cnt, 0);
    assert_eq!(entry.next_seq, 11);
    assert_eq!(ctrl.stats(), LroStatsSnap::default());

    // PSH is fine.
    let psh = s1.next(10).flags(TcpFlags::ACK | TcpFlags::PSH);
    assert!(rx_frame(&mut ctrl, &psh.build(&[2; 10]), true).is_aggregated());
}

#[test]
fn pool_capacity_limits_flows() {
    let mut ctrl = lro_ctrl(2, DEF_MTU);

    for port in [1000, 1001] {
        let frame = TcpSeg::new(flow(port), 1).build(&[1; 20]);
        assert!(rx_frame(&mut ctrl, &frame, true).is_aggregated());
    }

    let third = TcpSeg::new(flow(1002), 1).build(&[1; 20]);
    assert!(matches!(
        rx_frame(&mut ctrl, &third, true),
        LroResult::NotHandled(_)
    ));
    assert_eq!(ctrl.num_free(), 0);
    assert_eq!(ctrl.num_active(), 2);

    // Existing flows keep merging while the pool is full.
    let next = TcpSeg::new(flow(1000), 21).build(&[1; 20]);
    assert!(rx_frame(&mut ctrl, &next, true).is_aggregated());

    // Once flushed, the third flow fits.
    ctrl.flush_all();
    assert!(rx_frame(&mut ctrl, &third, true).is_aggregated());
    assert_conserved(&ctrl);
}

// A pure ACK updates the aggregate's control fields and is absorbed.
#[test]
fn pure_ack_absorbed() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(49154), 1).ack(10).window(1000);
    let s2 = s1.next(300).ack(20).window(2000);

    assert!(rx_frame(&mut ctrl, &s1.build(&[9; 300]), true).is_aggregated());
    let len = ctrl.entry(&flow(49154)).unwrap().len;

    assert!(rx_frame(&mut ctrl, &s2.build(&[]), true).is_aggregated());
    let entry = ctrl.entry(&flow(49154)).unwrap();
    assert_eq!(entry.append_cnt, 1);
    assert_eq!(entry.ack, 20);
    assert_eq!(entry.window, 2000);
    assert_eq!(entry.len, len);
    assert_eq!(entry.chain_len(), len);
    assert_eq!(ctrl.stats().flushed, 0);
    assert!(ctrl.deliver_mut().is_empty());

    ctrl.flush_all();
    let out = ctrl.free();
    assert_eq!(out.len(), 1);
    let bytes = out[0].copy_all();
    assert_eq!(bytes, coalesced(&s1, &s2, &[9; 300]));
    verify_frame(&bytes);
}

// The aggregate checksum equals the checksum of the concatenated
// payload for any mix of odd and even payload lengths, with or
// without a NIC supplied sum.
#[test]
fn merge_matches_concatenation() {
    let mut rng = StdRng::seed_from_u64(0x1520);

    for round in 0..200 {
        let mut ctrl = lro_ctrl(8, DEF_MTU);
        let use_ts = rng.random_bool(0.5);
        let use_hw = rng.random_bool(0.5);
        let nsegs = rng.random_range(2..=8);

        let mut first = TcpSeg::new(flow(40000 + round), rng.random());
        if use_ts {
            first = first.ts(rng.random_range(1..1 << 30), 1);
        }

        let mut seg = first;
        let mut last = first;
        let mut payload = Vec::new();
        for i in 0..nsegs {
            let len = match rng.random_range(0..4) {
                0 => rng.random_range(1..4),
                1 => 1448,
                _ => rng.random_range(1..=1460),
            };
            let body = random_payload(&mut rng, len);

            let res = rx_frame(&mut ctrl, &seg.build(&body), use_hw);
            assert!(res.is_aggregated(), "round {round} seg {i}");
            payload.extend_from_slice(&body);

            last = seg;
            seg = seg.next(len).ack(seg.ack + 1);
            if let Some(ts) = seg.ts {
                seg = seg.ts(ts.val + 1, ts.ecr + 1);
            }
        }

        let entry = ctrl.entry(&first.flow).unwrap();
        assert_eq!(entry.append_cnt as usize, nsegs - 1);
        assert_eq!(entry.len, first.hdrs_len() + payload.len());

        ctrl.flush_all();
        let out = ctrl.free();
        assert_eq!(out.len(), 1, "round {round}");
        let bytes = out[0].copy_all();
        assert_eq!(bytes, coalesced(&first, &last, &payload), "round {round}");

        let parsed = verify_frame(&bytes);
        assert_eq!(parsed.payload, payload);
    }
}

// Segments from many flows interleaved; each aggregate only ever
// holds its own flow's bytes.
#[test]
fn interleaved_flows_stay_separate() {
    let mut rng = StdRng::seed_from_u64(0xF10);
    let mut ctrl = lro_ctrl(4, DEF_MTU);
    let ports = [3000u16, 3001, 3002, 3003];
    let mut segs: Vec<TcpSeg> =
        ports.iter().map(|&p| TcpSeg::new(flow(p), u32::from(p))).collect();
    let mut payloads: Vec<Vec<u8>> = vec![Vec::new(); ports.len()];

    for _ in 0..40 {
        let i = rng.random_range(0..ports.len());
        let len = rng.random_range(1..=700);
        // Each flow's payload bytes carry its index.
        let body = vec![i as u8; len];
        let frame = segs[i].build(&body);
        assert!(rx_frame(&mut ctrl, &frame, true).is_aggregated());
        segs[i] = segs[i].next(len);
        payloads[i].extend_from_slice(&body);
        assert_conserved(&ctrl);
    }

    ctrl.flush_all();
    let out = ctrl.free();
    assert_eq!(out.len(), payloads.iter().filter(|p| !p.is_empty()).count());

    for pkt in out {
        let parsed = verify_frame(&pkt.copy_all());
        let i = ports.iter().position(|&p| p == parsed.src_port).unwrap();
        assert_eq!(parsed.payload, payloads[i]);
        assert!(parsed.payload.iter().all(|&b| b == i as u8));
    }
}

// Random traffic over several flows with gaps and control segments;
// entries are never lost or duplicated, and no aggregate ever exceeds
// the size limit.
#[test]
fn pool_conserved_and_threshold_held() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mtu: u32 = 60000;
    let limit = 65535 - mtu as usize;
    let mut ctrl = lro_ctrl(3, mtu);
    let ports = [4000u16, 4001, 4002, 4003, 4004];
    let mut next: Vec<TcpSeg> =
        ports.iter().map(|&p| TcpSeg::new(flow(p), 1)).collect();

    for step in 0..2000 {
        let i = rng.random_range(0..ports.len());
        let len = rng.random_range(0..=1460);
        let mut seg = next[i];

        match rng.random_range(0..20) {
            0 => seg = seg.next(17),
            1 => seg = seg.flags(TcpFlags::ACK | TcpFlags::FIN),
            _ => {}
        }

        let frame = seg.build(&random_payload(&mut rng, len));
        let res = rx_frame(&mut ctrl, &frame, rng.random_bool(0.5));
        if res.is_aggregated() {
            next[i] = seg.next(len);
        } else if let Some(entry) = ctrl.entry(&flow(ports[i])) {
            next[i].seq = entry.next_seq;
        } else {
            next[i] = seg.next(len).flags(TcpFlags::ACK);
        }

        assert_conserved(&ctrl);
        for f in ctrl.active_flows().collect::<Vec<_>>() {
            let entry = ctrl.entry(&f).unwrap();
            assert!(entry.len <= limit, "step {step}: {} > {limit}", entry.len);
            assert_eq!(entry.chain_len(), entry.len);
        }

        if rng.random_range(0..50) == 0 {
            ctrl.flush_all();
            assert_eq!(ctrl.num_active(), 0);
        }
    }

    ctrl.flush_all();
    let stats = ctrl.stats();
    let out = ctrl.free();
    assert_eq!(out.len() as u64, stats.flushed);
    for pkt in &out {
        assert!(pkt.byte_len() <= limit + 1460);
        verify_frame(&pkt.copy_all());
    }
}

#[test]
fn threshold_includes_trigger() {
    // Room for 3000 bytes of aggregate.
    let mtu: u32 = 65535 - 3000;
    let mut ctrl = lro_ctrl(2, mtu);
    let s1 = TcpSeg::new(flow(5000), 1);
    let s2 = s1.next(1400);
    let s3 = s2.next(1400);

    assert!(rx_frame(&mut ctrl, &s1.build(&[1; 1400]), true).is_aggregated());
    assert!(rx_frame(&mut ctrl, &s2.build(&[2; 1400]), true).is_aggregated());
    assert_eq!(ctrl.num_active(), 1);
    assert!(rx_frame(&mut ctrl, &s3.build(&[3; 1400]), true).is_aggregated());
    assert_eq!(ctrl.num_active(), 0);

    let out = ctrl.free();
    assert_eq!(out.len(), 1);
    let mut payload = vec![1u8; 1400];
    payload.extend_from_slice(&[2; 1400]);
    payload.extend_from_slice(&[3; 1400]);
    assert_eq!(out[0].copy_all(), coalesced(&s1, &s3, &payload));
}

// With no room reserved for the MTU, the IPv4 total length is the
// limit: a segment which would overflow it closes out the aggregate
// and starts a new one.
#[test]
fn ip_total_len_overflow_restarts() {
    let mut ctrl = lro_ctrl(2, 0);
    let s1 = TcpSeg::new(flow(5001), 0);
    let s2 = s1.next(30000);
    let s3 = s2.next(30000);

    for (seg, fill) in [(s1, 1u8), (s2, 2), (s3, 3)] {
        let frame = seg.build(&vec![fill; 30000]);
        assert!(rx_frame(&mut ctrl, &frame, true).is_aggregated());
    }

    assert_eq!(ctrl.deliver_mut().len(), 1);
    let entry = ctrl.entry(&flow(5001)).unwrap();
    assert_eq!(entry.append_cnt, 0);
    assert_eq!(entry.len, HDRS_LEN + 30000);
    assert_eq!(entry.next_seq, 90000);
    assert_conserved(&ctrl);

    ctrl.flush_all();
    let out = ctrl.free();
    assert_eq!(out.len(), 2);

    let mut payload = vec![1u8; 30000];
    payload.extend_from_slice(&[2; 30000]);
    let first = out[0].copy_all();
    assert_eq!(first.len(), HDRS_LEN + 60000);
    assert_eq!(first, coalesced(&s1, &s2, &payload));
    assert_eq!(verify_frame(&first).payload, payload);

    let second = out[1].copy_all();
    assert_eq!(second.len(), HDRS_LEN + 30000);
    assert_eq!(second, s3.build(&[3; 30000]));
    verify_frame(&second);
}

#[test]
fn bad_ip_checksum_is_invalid() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let mut frame = TcpSeg::new(flow(1), 1).build(&[1; 10]);
    // Corrupt the TTL.
    frame[ETHER_HDR_LEN + 8] ^= 0xFF;

    assert!(matches!(
        rx_frame(&mut ctrl, &frame, true),
        LroResult::Invalid(_)
    ));
    assert_eq!(ctrl.stats().bad_csum, 1);
    assert_eq!(ctrl.num_active(), 0);
}

#[test]
fn ineligible_frames_declined() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let good = TcpSeg::new(flow(1), 1).build(&[1; 10]);

    let mut ip_opts = good.clone();
    ip_opts[ETHER_HDR_LEN] = 0x46;
    let mut frag = good.clone();
    frag[ETHER_HDR_LEN + 6] = 0x20;
    let mut not_ip = good.clone();
    not_ip[12..14].copy_from_slice(&0x86DDu16.to_be_bytes());
    // An MSS option in place of a timestamp block.
    let mut mss = TcpSeg::new(flow(1), 1).ts(1, 1).build(&[1; 10]);
    mss[HDRS_LEN..HDRS_LEN + 4].copy_from_slice(&[2, 4, 5, 0xB4]);

    for frame in [ip_opts, frag, not_ip, mss] {
        let frame = fix_ip_csum(frame);
        assert!(matches!(
            rx_frame(&mut ctrl, &frame, true),
            LroResult::NotHandled(_)
        ));
    }

    assert_eq!(ctrl.num_active(), 0);
    assert_eq!(ctrl.stats().bad_csum, 0);
}

fn fix_ip_csum(mut frame: Vec<u8>) -> Vec<u8> {
    let ip = ETHER_HDR_LEN..ETHER_HDR_LEN + IPV4_HDR_LEN;
    frame[ETHER_HDR_LEN + 10..ETHER_HDR_LEN + 12].fill(0);
    let csum = !Checksum::compute(&frame[ip]).finalize();
    frame[ETHER_HDR_LEN + 10..ETHER_HDR_LEN + 12]
        .copy_from_slice(&csum.to_ne_bytes());
    frame
}

// Ethernet padding past the IP total length is not part of the
// aggregate.
#[test]
fn padding_trimmed() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(7), 1);
    let s2 = s1.next(4);

    let mut f1 = s1.build(&[1; 4]);
    let hw1 = hw_csum(&f1);
    f1.extend_from_slice(&[0; 2]);
    let mut f2 = s2.build(&[2; 5]);
    let hw2 = hw_csum(&f2);
    f2.extend_from_slice(&[0xEE; 1]);

    assert!(ctrl.rx(MsgBlk::copy(&f1), hw1).is_aggregated());
    assert!(ctrl.rx(MsgBlk::copy(&f2), hw2).is_aggregated());

    ctrl.flush_all();
    let out = ctrl.free();
    let mut payload = vec![1u8; 4];
    payload.extend_from_slice(&[2; 5]);
    assert_eq!(out[0].copy_all(), coalesced(&s1, &s2, &payload));
}

#[test]
fn truncated_frame_is_invalid() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let mut frame = TcpSeg::new(flow(7), 1).build(&[1; 40]);
    frame.truncate(frame.len() - 1);
    assert!(matches!(
        ctrl.rx(MsgBlk::copy(&frame), 0),
        LroResult::Invalid(_)
    ));
    assert_eq!(ctrl.num_active(), 0);
}

// Frames arriving as several buffers, with headers split across them,
// aggregate the same as contiguous ones.
#[test]
fn segmented_frames() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(8), 1).ts(5, 5);
    let s2 = s1.next(333).ts(6, 6);
    let s3 = s2.next(201).ts(7, 7);
    let p1 = vec![0x11u8; 333];
    let p2 = vec![0x22u8; 201];
    let p3 = vec![0x33u8; 64];

    let f1 = s1.build(&p1);
    let f2 = s2.build(&p2);
    let f3 = s3.build(&p3);

    let m1 = split_mblk(&f1, &[10, 40, 70]);
    let m2 = split_mblk(&f2, &[60, 61, 200]);
    let m3 = split_mblk(&f3, &[s3.hdrs_len()]);
    assert!(ctrl.rx(m1, hw_csum(&f1)).is_aggregated());
    assert!(ctrl.rx(m2, 0).is_aggregated());
    assert!(ctrl.rx(m3, hw_csum(&f3)).is_aggregated());

    ctrl.flush_all();
    let out = ctrl.free();
    assert_eq!(out.len(), 1);

    let mut payload = p1;
    payload.extend_from_slice(&p2);
    payload.extend_from_slice(&p3);
    let bytes = out[0].copy_all();
    assert_eq!(bytes, coalesced(&s1, &s3, &payload));
    verify_frame(&bytes);

    // No empty buffers made it into the aggregate.
    assert!(out[0].iter().all(|seg| !seg.is_empty()));
}

#[test]
fn flushed_checksum_state() {
    let mut ctrl = lro_ctrl(8, DEF_MTU);
    let s1 = TcpSeg::new(flow(9), 1);
    assert!(rx_frame(&mut ctrl, &s1.build(&[1; 10]), true).is_aggregated());
    let f2 = s1.next(10).build(&[1; 10]);
    assert!(rx_frame(&mut ctrl, &f2, true).is_aggregated());
    ctrl.flush_all();

    let out = ctrl.free();
    assert_eq!(
        out[0].cksum_flags(),
        MblkOffloadFlags::HCK_IPV4_HDRCKSUM_OK
            | MblkOffloadFlags::HCK_FULLCKSUM_OK
    );
}

#[test]
fn teardown_with_active_entries() {
    let mut ctrl = lro_ctrl(4, DEF_MTU);
    for port in 0..3 {
        let frame = TcpSeg::new(flow(port), 1).build(&[1; 10]);
        assert!(rx_frame(&mut ctrl, &frame, true).is_aggregated());
    }

    // Entries still active are dropped, not delivered.
    let out = ctrl.free();
    assert!(out.is_empty());
}

#[test]
fn closure_deliver() {
    let mut delivered = Vec::new();
    let mut ctrl = LroCtrl::new(
        LroCfg::default(),
        std::sync::Arc::new(Interface::new("lro1", DEF_MTU)),
        |pkt: MsgBlk| delivered.push(pkt.byte_len()),
        Box::new(PrintlnLog),
    )
    .unwrap();

    let frame = TcpSeg::new(flow(9), 1).build(&[1; 10]);
    assert!(ctrl.rx(MsgBlk::copy(&frame), 0).is_aggregated());
    ctrl.flush_all();
    drop(ctrl.free());
    assert_eq!(delivered, [frame.len()]);
}

#[test]
fn config_from_ron() {
    let cfg: LroCfg = ron::from_str("(max_entries: 3)").unwrap();
    let ctrl: LroCtrl<Vec<MsgBlk>> = LroCtrl::new(
        cfg,
        std::sync::Arc::new(Interface::new("lro2", DEF_MTU)),
        Vec::new(),
        Box::new(PrintlnLog),
    )
    .unwrap();
    assert_eq!(ctrl.capacity(), 3);
    assert_eq!(ctrl.num_free(), 3);
}
