//! # End-to-end: chains, streaming, demux isolation, fault reporting
//!
//! The full vertical stack against the in-process fabric emulator:
//! discovery → wiring → flow control → streaming → teardown. No real
//! network I/O — the link is a loopback pair.

mod support;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::RngExt;

use gridlink_host::chain::{BlockSpec, ChainSpec, Direction};
use gridlink_host::config::HostConfig;
use gridlink_host::demux::Demux;
use gridlink_host::error::LinkError;
use gridlink_host::transport::{LinkTransport, LoopbackTransport};
use gridlink_host::{HostContext, RecvStatus, SendStatus, StreamMode, StreamSession};
use gridlink_wire::{ChdrHeader, ChdrPacket, Sid, TxErrorCode};

use support::{EmBlockSpec, FabricEmulator};

const HOST_ADDR: u16 = 0x0001;
const HOST_CTRL_ADDR: u16 = 0x0002;

/// Identity matching the reserved source/sink pattern.
const SOURCE_ID: u64 = 0xAAAA_BBBB_CCCC_0000;
/// An ordinary processing block identity.
const GENERIC_ID: u64 = 0x1234_5678_9ABC_DEF0;

fn rx_spec(first_window: u32) -> ChainSpec {
    ChainSpec {
        host_addr: HOST_ADDR,
        host_ctrl_addr: HOST_CTRL_ADDR,
        blocks: vec![
            BlockSpec {
                ctrl_addr: 0x0210,
                data_addr: 0x0211,
                window_pkts: first_window,
            },
            BlockSpec {
                ctrl_addr: 0x0214,
                data_addr: 0x0215,
                window_pkts: 16,
            },
        ],
        direction: Direction::Rx,
        fc_cycles_per_ack: 0,
        fc_packets_per_ack: 2,
        ack_spacing: 4,
        lines_per_packet: 4, // 32-byte packets keep the test quick
        rate_divider: 12,
    }
}

fn rx_fixture() -> (HostContext, FabricEmulator) {
    let (host_link, device_link) = LoopbackTransport::pair(4096);
    let emu = FabricEmulator::spawn(
        device_link,
        vec![
            EmBlockSpec {
                ctrl_addr: 0x0210,
                data_addr: 0x0211,
                identity: SOURCE_ID,
                buf_alloc0: 0x0707,
                buf_alloc1: 0,
            },
            EmBlockSpec {
                ctrl_addr: 0x0214,
                data_addr: 0x0215,
                identity: GENERIC_ID,
                buf_alloc0: 0x0707,
                buf_alloc1: 0,
            },
        ],
        HOST_ADDR,
    );
    let ctx = HostContext::new(Arc::new(host_link), HostConfig::default());
    (ctx, emu)
}

// ─── Scenario A: two-block receive chain ─────────────────────────────────────

#[test]
fn bounded_receive_through_two_block_chain() {
    let (ctx, _emu) = rx_fixture();
    let mut session = StreamSession::open(rx_spec(8), &ctx).unwrap();

    // Discovery: classification and buffer unpacking.
    let x = session.block(0).unwrap();
    let y = session.block(1).unwrap();
    assert_eq!(x.identity(), SOURCE_ID);
    assert_eq!(x.name(), "SrcSink_0");
    assert_eq!(y.name(), "CE_0");
    // 0x0707 → two ports of 2^7 lines = 1024 bytes each.
    assert_eq!(x.get_fifo_size(0), 1024);
    assert_eq!(x.get_fifo_size(1), 1024);
    assert_eq!(y.get_fifo_size(0), 1024);
    // Upstream links are table indices, not pointers.
    assert_eq!(y.upstream_blocks(), &[0]);

    session.start(StreamMode::Bounded(1000)).unwrap();

    let mut buf = [0u8; 64];
    while !session.is_complete() {
        let (n, status) = session
            .recv(&mut buf, Duration::from_secs(5))
            .expect("recv failed");
        assert_eq!(status, RecvStatus::Ok, "unexpected status mid-stream");
        assert_eq!(n, 32);
    }

    let stats = session.stop().unwrap();
    assert_eq!(stats.packets, 1000);
    assert_eq!(stats.bytes, 32 * 1000);
    // Sequences ran 0..=999 with no gap.
    assert_eq!(stats.last_seq, 999);
    assert_eq!(stats.faults, 0);
    assert!(stats.acks_sent >= 250);
}

#[test]
fn unsound_flow_control_disable_is_refused() {
    let (ctx, _emu) = rx_fixture();
    // Window 0 between two hardware blocks: the 1024-byte buffer cannot
    // absorb an unbounded transfer.
    match StreamSession::open(rx_spec(0), &ctx) {
        Err(LinkError::PolicyViolation(_)) => {}
        other => panic!("expected refusal, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn oversized_window_is_refused() {
    let (ctx, _emu) = rx_fixture();
    // 1024-byte buffer at 32 bytes/packet holds 32 packets; 100 cannot fit.
    match StreamSession::open(rx_spec(100), &ctx) {
        Err(LinkError::PolicyViolation(_)) => {}
        other => panic!("expected refusal, got {:?}", other.map(|_| ())),
    }
}

// ─── Scenario B: demux isolation ─────────────────────────────────────────────

#[test]
fn interleaved_streams_never_cross() {
    let (host_link, device_link) = LoopbackTransport::pair(4096);
    let demux = Arc::new(Demux::new(Arc::new(host_link)));

    let sid_a = Sid::from_addrs(0x0211, HOST_ADDR);
    let sid_b = Sid::from_addrs(0x0215, HOST_ADDR);
    let mut handle_a = demux.register(sid_a).unwrap();
    let mut handle_b = demux.register(sid_b).unwrap();

    const PER_STREAM: u16 = 200;
    let feeder = thread::spawn(move || {
        for seq in 0..PER_STREAM {
            for sid in [sid_a, sid_b] {
                let body = vec![sid.src_device(); 16];
                let pkt = ChdrPacket::new(ChdrHeader::data(seq, sid), body.into());
                device_link
                    .send_frame(&pkt.encode(), Duration::from_millis(100))
                    .unwrap();
            }
        }
    });

    let reader_a = thread::spawn(move || {
        let mut seqs = Vec::new();
        for _ in 0..PER_STREAM {
            let pkt = handle_a.poll(Duration::from_secs(5)).unwrap();
            assert_eq!(pkt.header.sid, sid_a, "packet for B leaked into A");
            seqs.push(pkt.header.seq);
        }
        seqs
    });
    let reader_b = thread::spawn(move || {
        let mut seqs = Vec::new();
        for _ in 0..PER_STREAM {
            let pkt = handle_b.poll(Duration::from_secs(5)).unwrap();
            assert_eq!(pkt.header.sid, sid_b, "packet for A leaked into B");
            seqs.push(pkt.header.seq);
        }
        seqs
    });

    feeder.join().unwrap();
    let seqs_a = reader_a.join().unwrap();
    let seqs_b = reader_b.join().unwrap();

    // Both drained fully, in arrival order.
    let expected: Vec<u16> = (0..PER_STREAM).collect();
    assert_eq!(seqs_a, expected);
    assert_eq!(seqs_b, expected);
}

// ─── Scenario C: transmit fault reporting ────────────────────────────────────

fn tx_fixture() -> (HostContext, FabricEmulator, ChainSpec) {
    let (host_link, device_link) = LoopbackTransport::pair(4096);
    let emu = FabricEmulator::spawn(
        device_link,
        vec![EmBlockSpec {
            ctrl_addr: 0x0310,
            data_addr: 0x0311,
            identity: GENERIC_ID,
            // 2^11 lines = 16 KiB input buffer
            buf_alloc0: 0x0B,
            buf_alloc1: 0,
        }],
        HOST_ADDR,
    );
    let ctx = HostContext::new(Arc::new(host_link), HostConfig::default());
    let spec = ChainSpec {
        host_addr: HOST_ADDR,
        host_ctrl_addr: HOST_CTRL_ADDR,
        blocks: vec![BlockSpec {
            ctrl_addr: 0x0310,
            data_addr: 0x0311,
            window_pkts: 0,
        }],
        direction: Direction::Tx,
        fc_cycles_per_ack: 0,
        fc_packets_per_ack: 2,
        ack_spacing: 0,
        lines_per_packet: 4,
        rate_divider: 0,
    };
    (ctx, emu, spec)
}

#[test]
fn underrun_enters_fault_substate_and_freezes_counters() {
    let (ctx, emu, spec) = tx_fixture();
    let mut session = StreamSession::open(spec, &ctx).unwrap();
    session.start(StreamMode::Continuous).unwrap();

    let mut rng = rand::rng();
    let mut payload = [0u8; 32];

    for _ in 0..5 {
        rng.fill(&mut payload[..]);
        let (n, status) = session.send(&payload, Duration::from_secs(1)).unwrap();
        assert_eq!(n, 32);
        assert_eq!(status, SendStatus::Ok);
    }

    emu.inject_tx_error(0x0311, TxErrorCode::Underrun);
    thread::sleep(Duration::from_millis(100));

    let before = session.stats();
    let (n, status) = session.send(&payload, Duration::from_secs(1)).unwrap();
    assert_eq!(n, 0);
    assert_eq!(status, SendStatus::Underrun, "fault must ride the status");
    let after = session.stats();
    // Counters stop while the fault is being reported.
    assert_eq!(after.packets, before.packets);
    assert_eq!(after.faults, before.faults + 1);

    // The session stays alive: the next send recovers and resumes.
    let (n, status) = session.send(&payload, Duration::from_secs(1)).unwrap();
    assert_eq!(n, 32);
    assert_eq!(status, SendStatus::Ok);
    let resumed = session.stats();
    assert_eq!(resumed.packets, before.packets + 1);

    // The sink actually consumed the traffic.
    thread::sleep(Duration::from_millis(100));
    assert!(emu.sunk_packets(0x0311) >= 6);

    session.stop().unwrap();
}

#[test]
fn stop_drains_and_closes() {
    let (ctx, _emu) = rx_fixture();
    let mut session = StreamSession::open(rx_spec(8), &ctx).unwrap();
    session.start(StreamMode::Continuous).unwrap();

    let mut buf = [0u8; 64];
    for _ in 0..20 {
        session.recv(&mut buf, Duration::from_secs(2)).unwrap();
    }
    let stats = session.stop().unwrap();
    assert!(stats.packets >= 20);
    assert!(stats.elapsed_secs > 0.0);

    // Closed is terminal: transfer calls are rejected.
    assert!(matches!(
        session.recv(&mut buf, Duration::from_millis(10)),
        Err(LinkError::Closed)
    ));
    // stop is idempotent.
    let again = session.stop().unwrap();
    assert_eq!(again.packets, stats.packets);
}
