//! In-process fabric emulator.
//!
//! Sits on the device end of a loopback link and behaves like a crossbar
//! full of blocks: answers settings-bus traffic through the readback mux,
//! produces data when a source block is enabled, forwards hop-by-hop along
//! programmed next-destination registers, consumes at sinks, reports
//! credit, and injects burst errors on demand. No real network anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};

use gridlink_host::transport::{LinkTransport, LoopbackTransport};
use gridlink_wire::regs::{
    sr_addr, sr_addr64, BYTES_PER_LINE, RB_BUF_ALLOC0, RB_BUF_ALLOC1, RB_ID, SR_LINES_PER_PACKET,
    SR_FLOW_CTRL_PKTS_PER_ACK, SR_FLOW_CTRL_WINDOW_EN, SR_FLOW_CTRL_WINDOW_SIZE, SR_NEXT_DST,
    SR_READBACK, SR_STREAM_ENABLE,
};
use gridlink_wire::{
    ChdrHeader, ChdrPacket, CtrlResponse, CtrlWrite, FlowCtrlAck, PacketType, Sid, TxErrorCode,
    TxResponse,
};

/// Per-iteration production cap, so the emulator never starves the link.
const PRODUCE_BURST: usize = 16;

/// Static description of one emulated block.
#[derive(Debug, Clone)]
pub struct EmBlockSpec {
    pub ctrl_addr: u16,
    pub data_addr: u16,
    pub identity: u64,
    pub buf_alloc0: u64,
    pub buf_alloc1: u64,
}

enum Command {
    /// Send a burst-status context packet from `from_addr` to the host.
    InjectTxError { from_addr: u16, code: TxErrorCode },
}

struct EmBlock {
    spec: EmBlockSpec,
    regs: HashMap<u32, u32>,
    readback_sel: u32,
    tx_seq: u16,
    produced: u64,
    /// Data packets this block consumed as a sink.
    sunk: Arc<AtomicU64>,
    sink_pkts_since_ack: u32,
}

impl EmBlock {
    fn reg(&self, reg: u32) -> u32 {
        self.regs.get(&sr_addr(reg)).copied().unwrap_or(0)
    }

    fn next_dst(&self) -> Option<u16> {
        let word = self.reg(SR_NEXT_DST);
        if word & (1 << 16) != 0 {
            Some(word as u16)
        } else {
            None
        }
    }

    fn readback_word(&self) -> u64 {
        match self.readback_sel {
            a if a == sr_addr64(RB_ID) => self.spec.identity,
            a if a == sr_addr64(RB_BUF_ALLOC0) => self.spec.buf_alloc0,
            a if a == sr_addr64(RB_BUF_ALLOC1) => self.spec.buf_alloc1,
            _ => 0,
        }
    }
}

/// Handle to the emulator thread. Stops on drop.
pub struct FabricEmulator {
    stop: Arc<AtomicBool>,
    commands: Sender<Command>,
    sunk: HashMap<u16, Arc<AtomicU64>>,
    handle: Option<JoinHandle<()>>,
}

impl FabricEmulator {
    pub fn spawn(device: LoopbackTransport, blocks: Vec<EmBlockSpec>, host_addr: u16) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = unbounded();

        let mut table: Vec<EmBlock> = blocks
            .into_iter()
            .map(|spec| EmBlock {
                spec,
                regs: HashMap::new(),
                readback_sel: 0,
                tx_seq: 0,
                produced: 0,
                sunk: Arc::new(AtomicU64::new(0)),
                sink_pkts_since_ack: 0,
            })
            .collect();
        let sunk: HashMap<u16, Arc<AtomicU64>> = table
            .iter()
            .map(|b| (b.spec.data_addr, Arc::clone(&b.sunk)))
            .collect();

        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            // Credit the host has granted, shared across the chain: the
            // producer's sequence space survives forwarding untouched.
            let mut credit_acked: u64 = 0;
            let mut last_credit_seq: u16 = 4095;

            while !stop_flag.load(Ordering::Relaxed) {
                while let Ok(cmd) = command_rx.try_recv() {
                    match cmd {
                        Command::InjectTxError { from_addr, code } => {
                            let sid = Sid::from_addrs(from_addr, host_addr);
                            let pkt = ChdrPacket::new(
                                ChdrHeader::context(0, sid),
                                TxResponse { code, seq_id: 0 }.to_bytes(),
                            );
                            let _ = device.send_frame(&pkt.encode(), Duration::from_millis(100));
                        }
                    }
                }

                match device.recv_frame(Duration::from_millis(2)) {
                    Ok(Some(frame)) => {
                        if let Ok(pkt) = ChdrPacket::decode(&mut &frame[..]) {
                            dispatch(
                                &device,
                                &mut table,
                                pkt,
                                host_addr,
                                &mut credit_acked,
                                &mut last_credit_seq,
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(_) => break, // host side gone
                }

                produce(&device, &mut table, host_addr, credit_acked);
            }
        });

        FabricEmulator {
            stop,
            commands,
            sunk,
            handle: Some(handle),
        }
    }

    /// Report a burst error to the host, as the block at `from_addr`.
    pub fn inject_tx_error(&self, from_addr: u16, code: TxErrorCode) {
        self.commands
            .send(Command::InjectTxError { from_addr, code })
            .expect("emulator gone");
    }

    /// Data packets consumed by the sink at `data_addr`.
    pub fn sunk_packets(&self, data_addr: u16) -> u64 {
        self.sunk
            .get(&data_addr)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Drop for FabricEmulator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Route one host-originated frame to the right block behavior.
fn dispatch(
    device: &LoopbackTransport,
    table: &mut [EmBlock],
    pkt: ChdrPacket,
    host_addr: u16,
    credit_acked: &mut u64,
    last_credit_seq: &mut u16,
) {
    let dst = pkt.header.sid.dst_addr();

    // Settings-bus traffic.
    if pkt.header.packet_type == PacketType::Context {
        if let Some(block) = table.iter_mut().find(|b| b.spec.ctrl_addr == dst) {
            if let Ok(write) = CtrlWrite::decode(&mut &pkt.payload[..]) {
                if write.addr == sr_addr(SR_READBACK) {
                    block.readback_sel = write.data;
                } else {
                    block.regs.insert(write.addr, write.data);
                }
                let reply = ChdrPacket::new(
                    ChdrHeader::context(pkt.header.seq, pkt.header.sid.reversed()),
                    CtrlResponse {
                        data: block.readback_word(),
                    }
                    .to_bytes(),
                );
                let _ = device.send_frame(&reply.encode(), Duration::from_millis(100));
            }
            return;
        }
        // Credit from the host for a data stream.
        if let Some(_block) = table.iter().find(|b| b.spec.data_addr == dst) {
            if pkt.payload.len() == FlowCtrlAck::ENCODED_LEN {
                if let Ok(ack) = FlowCtrlAck::decode(&mut &pkt.payload[..]) {
                    let delta = ack.seq_id.wrapping_sub(*last_credit_seq) % 4096;
                    *credit_acked += u64::from(delta);
                    *last_credit_seq = ack.seq_id;
                }
            }
        }
        return;
    }

    // Host-originated data into the chain.
    deliver_data(device, table, pkt, host_addr);
}

/// Deliver a data packet to the block owning `dst`, forwarding along
/// next-destination registers until it leaves the fabric or is consumed.
fn deliver_data(device: &LoopbackTransport, table: &mut [EmBlock], pkt: ChdrPacket, host_addr: u16) {
    let mut current = pkt;
    for _hop in 0..table.len() + 1 {
        let dst = current.header.sid.dst_addr();
        if dst == host_addr {
            let _ = device.send_frame(&current.encode(), Duration::from_millis(100));
            return;
        }
        let Some(index) = table.iter().position(|b| b.spec.data_addr == dst) else {
            return; // nowhere to go; the crossbar drops it
        };
        match table[index].next_dst() {
            Some(next) => {
                // Forward: rewrite the SID hop, keep seq and payload.
                let my_addr = table[index].spec.data_addr;
                current.header.sid = Sid::from_addrs(my_addr, next);
            }
            None => {
                // Sink: consume and report credit per the programmed cadence.
                let block = &mut table[index];
                block.sunk.fetch_add(1, Ordering::Relaxed);
                block.sink_pkts_since_ack += 1;
                let cadence = block.reg(SR_FLOW_CTRL_PKTS_PER_ACK);
                if cadence & (1 << 31) != 0 {
                    let every = cadence & 0x7FFF_FFFF;
                    if every > 0 && block.sink_pkts_since_ack >= every {
                        block.sink_pkts_since_ack = 0;
                        let sid = Sid::from_addrs(block.spec.data_addr, host_addr);
                        let ack = ChdrPacket::new(
                            ChdrHeader::context(current.header.seq, sid),
                            FlowCtrlAck {
                                seq_id: current.header.seq,
                            }
                            .to_bytes(),
                        );
                        let _ = device.send_frame(&ack.encode(), Duration::from_millis(100));
                    }
                }
                return;
            }
        }
    }
}

/// Let every enabled source block produce a bounded burst.
fn produce(device: &LoopbackTransport, table: &mut [EmBlock], host_addr: u16, credit_acked: u64) {
    for index in 0..table.len() {
        if table[index].reg(SR_STREAM_ENABLE) & 1 == 0 {
            continue;
        }
        let lines = table[index].reg(SR_LINES_PER_PACKET);
        if lines == 0 {
            continue;
        }
        let window_enabled = table[index].reg(SR_FLOW_CTRL_WINDOW_EN) & 1 == 1;
        let window = u64::from(table[index].reg(SR_FLOW_CTRL_WINDOW_SIZE)) + 1;

        for _ in 0..PRODUCE_BURST {
            if window_enabled && table[index].produced - credit_acked >= window {
                break; // out of credit until the host acks
            }
            let Some(next) = table[index].next_dst() else {
                break;
            };
            let seq = table[index].tx_seq;
            table[index].tx_seq = (seq + 1) % 4096;
            table[index].produced += 1;

            let payload = vec![seq as u8; lines as usize * BYTES_PER_LINE];
            let sid = Sid::from_addrs(table[index].spec.data_addr, next);
            let pkt = ChdrPacket::new(ChdrHeader::data(seq, sid), Bytes::from(payload));
            deliver_data(device, table, pkt, host_addr);
        }
    }
}
