//! # Streaming session
//!
//! The per-connection state machine a client drives:
//!
//! ```text
//!   Idle ──open──▶ Configuring ──start──▶ Streaming ──stop──▶ Draining ──▶ Closed
//!                                           │    ▲
//!                                     fault │    │ recovery
//!                                           ▼    │
//!                                          Fault ┘
//! ```
//!
//! A session owns its data SID, the block table of the chain it assembled,
//! and the demux handle its packets arrive on. Recoverable conditions —
//! sequence gaps, underruns, overruns — are reported as status values on
//! every `recv`/`send` call, never as unwinding, so high-rate loops stay
//! cheap. Only transport death or teardown reaches `Closed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, info, warn};

use gridlink_wire::chdr::SEQ_MODULUS;
use gridlink_wire::flow::disable_is_sound;
use gridlink_wire::seq::{Seq12, SeqGen, SeqStatus};
use gridlink_wire::{
    BurstFlags, ChdrHeader, ChdrPacket, FlowCtrlAck, PacketType, Sid, TxErrorCode, TxResponse,
};

use crate::block::BlockController;
use crate::chain::{ChainSpec, Direction};
use crate::config::HostConfig;
use crate::demux::{Demux, DemuxHandle};
use crate::error::LinkError;
use crate::stats::SessionStats;
use crate::transport::LinkTransport;

// ─── Context ─────────────────────────────────────────────────────────────────

/// Everything a session needs injected: the shared transport (behind the
/// demux) and the host configuration. Sessions built from the same context
/// share one physical link; the link dies with its last owner.
pub struct HostContext {
    demux: Arc<Demux>,
    config: HostConfig,
}

impl HostContext {
    pub fn new(transport: Arc<dyn LinkTransport>, config: HostConfig) -> Self {
        let demux = Arc::new(Demux::with_capacity(
            transport,
            config.unclaimed_capacity,
            config.queue_depth,
        ));
        HostContext { demux, config }
    }

    pub fn demux(&self) -> &Arc<Demux> {
        &self.demux
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

// ─── Modes, states, statuses ─────────────────────────────────────────────────

/// How much to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Continuous,
    /// Exactly this many packets.
    Bounded(u64),
}

/// Session lifecycle state. `Fault` is the overflow/underflow sub-state of
/// `Streaming`: the next transfer call performs recovery and re-enters
/// `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Streaming,
    Fault,
    Draining,
    Closed,
}

/// Outcome of one `recv` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Ok,
    /// Nothing arrived within the bound.
    Timeout,
    /// The stream jumped; tracker has resynced.
    SequenceGap { expected: u16, actual: u16 },
    /// Upstream reported buffer trouble.
    Overrun,
}

/// Outcome of one `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Ok,
    /// No credit or link backpressure within the bound.
    Timeout,
    Underrun,
    SeqError,
    TimeError,
    MidBurstSeqError,
}

impl SendStatus {
    fn from_fault(code: TxErrorCode) -> Option<Self> {
        match code {
            TxErrorCode::Underrun => Some(SendStatus::Underrun),
            TxErrorCode::SeqError => Some(SendStatus::SeqError),
            TxErrorCode::TimeError => Some(SendStatus::TimeError),
            TxErrorCode::MidBurstSeqError => Some(SendStatus::MidBurstSeqError),
            TxErrorCode::Ack | TxErrorCode::Eob => None,
        }
    }
}

/// A context packet on the data stream is one of two things, told apart by
/// payload size: a 4-byte credit report or an 8-byte burst status.
enum DataContext {
    Credit(FlowCtrlAck),
    Burst(TxResponse),
}

fn classify_context(pkt: &ChdrPacket) -> Option<DataContext> {
    match pkt.payload.len() {
        FlowCtrlAck::ENCODED_LEN => FlowCtrlAck::decode(&mut &pkt.payload[..])
            .ok()
            .map(DataContext::Credit),
        TxResponse::ENCODED_LEN => match TxResponse::decode(&mut &pkt.payload[..]) {
            Ok(resp) => Some(DataContext::Burst(resp)),
            Err(e) => {
                warn!(error = %e, "context packet on data stream not understood");
                None
            }
        },
        other => {
            warn!(len = other, "context packet on data stream not understood");
            None
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One streaming connection through a chain of blocks.
pub struct StreamSession {
    state: SessionState,
    mode: Option<StreamMode>,
    spec: ChainSpec,
    /// Host → peer, used for outgoing data and credit reports.
    data_sid: Sid,
    data_rx: DemuxHandle,
    demux: Arc<Demux>,
    /// Session-owned block table, upstream → downstream.
    blocks: Vec<BlockController>,
    ctrl_timeout: Duration,
    drain_timeout: Duration,

    tx_seq: SeqGen,
    rx_seq: Seq12,
    sent_sob: bool,
    pending_fault: Option<SendStatus>,

    /// Transmit credit: how many packets the downstream buffer holds.
    /// Zero means no host-side window (receive chains, or unlimited).
    credit_window: u32,
    sent_count: u64,
    acked_count: u64,
    last_credit_seq: u16,

    stats: SessionStats,
    started_at: Option<Instant>,
}

impl StreamSession {
    /// Assemble and configure a chain: attach a controller per block, wire
    /// destinations front-to-back, program flow control on every port.
    /// Misconfiguration fails hard here, before any data moves.
    pub fn open(spec: ChainSpec, ctx: &HostContext) -> Result<Self, LinkError> {
        spec.validate()?;
        let demux = Arc::clone(ctx.demux());
        let ctrl_timeout = ctx.config().ctrl_timeout();
        let drain_timeout = ctx.config().drain_timeout();

        // Attach every block; the table owns them for the session's life.
        let mut taken_names = HashSet::new();
        let mut blocks = Vec::with_capacity(spec.blocks.len());
        for bs in &spec.blocks {
            let ctrl_sid = Sid::from_addrs(spec.host_ctrl_addr, bs.ctrl_addr);
            blocks.push(BlockController::attach(
                &demux,
                ctrl_sid,
                ctrl_timeout,
                &mut taken_names,
            )?);
        }

        // Upstream back-references: indices only, never owners.
        for i in 1..blocks.len() {
            blocks[i].register_upstream_block(i - 1);
        }

        let bpp = spec.bytes_per_packet();
        let fifo_pkts: Vec<u32> = blocks
            .iter()
            .map(|b| (b.get_fifo_size(0) / bpp) as u32)
            .collect();

        let n = blocks.len();
        let mut credit_window = 0u32;
        match spec.direction {
            Direction::Rx => {
                for i in 0..n {
                    let next_addr = if i + 1 < n {
                        spec.blocks[i + 1].data_addr
                    } else {
                        spec.host_addr
                    };
                    let window = spec.blocks[i].window_pkts;
                    if i + 1 < n {
                        check_edge_window(&spec, window, fifo_pkts[i + 1], i)?;
                    }
                    blocks[i].set_destination(0, next_addr)?;
                    blocks[i]
                        .configure_flow_control_in(spec.fc_cycles_per_ack, spec.fc_packets_per_ack)?;
                    let peer = Sid::from_addrs(spec.blocks[i].data_addr, next_addr);
                    blocks[i].configure_flow_control_out(window, peer)?;
                    blocks[i].reset_flow_control()?;
                }
                blocks[0].set_lines_per_packet(spec.lines_per_packet)?;
                blocks[0].set_rate_divider(spec.rate_divider)?;
                blocks[0].set_bytes_per_output_packet(bpp, 0)?;
            }
            Direction::Tx => {
                // Host feeds block 0; its FIFO is the host's credit window.
                if fifo_pkts[0] == 0 {
                    return Err(LinkError::PolicyViolation(format!(
                        "packet size {bpp} exceeds first block's input buffer"
                    )));
                }
                credit_window = fifo_pkts[0];
                for i in 0..n {
                    if i + 1 < n {
                        let window = spec.blocks[i].window_pkts;
                        check_edge_window(&spec, window, fifo_pkts[i + 1], i)?;
                        blocks[i].set_destination(0, spec.blocks[i + 1].data_addr)?;
                        let peer =
                            Sid::from_addrs(spec.blocks[i].data_addr, spec.blocks[i + 1].data_addr);
                        blocks[i].configure_flow_control_out(window, peer)?;
                    }
                    blocks[i]
                        .configure_flow_control_in(spec.fc_cycles_per_ack, spec.fc_packets_per_ack)?;
                    blocks[i].reset_flow_control()?;
                }
            }
        }

        // Data arrives from (rx) or credit returns from (tx) this peer.
        let peer_data_addr = match spec.direction {
            Direction::Rx => spec.blocks[n - 1].data_addr,
            Direction::Tx => spec.blocks[0].data_addr,
        };
        let data_rx = demux.register(Sid::from_addrs(peer_data_addr, spec.host_addr))?;
        let data_sid = Sid::from_addrs(spec.host_addr, peer_data_addr);

        info!(%data_sid, blocks = n, direction = ?spec.direction, "chain configured");

        Ok(StreamSession {
            state: SessionState::Configuring,
            mode: None,
            spec,
            data_sid,
            data_rx,
            demux,
            blocks,
            ctrl_timeout,
            drain_timeout,
            tx_seq: SeqGen::new(),
            rx_seq: Seq12::new(),
            sent_sob: false,
            pending_fault: None,
            credit_window,
            sent_count: 0,
            acked_count: 0,
            last_credit_seq: SEQ_MODULUS - 1,
            stats: SessionStats::new(),
            started_at: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn data_sid(&self) -> Sid {
        self.data_sid
    }

    pub fn block(&self, index: usize) -> Option<&BlockController> {
        self.blocks.get(index)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Begin streaming. Receive chains get the source block's enable bit;
    /// transmit chains simply arm and stream on the first `send`.
    pub fn start(&mut self, mode: StreamMode) -> Result<(), LinkError> {
        if self.state != SessionState::Configuring {
            return Err(LinkError::PolicyViolation(format!(
                "start() in {:?}",
                self.state
            )));
        }
        self.mode = Some(mode);
        self.started_at = Some(Instant::now());
        if self.spec.direction == Direction::Rx {
            self.blocks[0].set_stream_enable(true)?;
        }
        self.state = SessionState::Streaming;
        info!(mode = ?mode, "streaming started");
        Ok(())
    }

    /// Bounded transfers: has the target packet count been reached?
    pub fn is_complete(&self) -> bool {
        matches!(self.mode, Some(StreamMode::Bounded(n)) if self.stats.packets >= n)
    }

    /// Receive at most one packet's worth of samples into `buf`.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(usize, RecvStatus), LinkError> {
        self.enter_transfer()?;

        let deadline = std::time::Instant::now() + timeout;
        let pkt = loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok((0, RecvStatus::Timeout));
            }
            let pkt = match self.data_rx.poll(remaining) {
                Ok(pkt) => pkt,
                Err(LinkError::Timeout) => return Ok((0, RecvStatus::Timeout)),
                Err(e) => return self.terminal(e),
            };
            if pkt.header.packet_type == PacketType::Data {
                break pkt;
            }
            // Anything with a fault code here means upstream buffer trouble;
            // other context traffic is not ours to consume.
            if let Some(DataContext::Burst(resp)) = classify_context(&pkt) {
                if resp.code.is_fault() {
                    self.stats.faults += 1;
                    self.state = SessionState::Fault;
                    return Ok((0, RecvStatus::Overrun));
                }
            }
        };

        let status = match self.rx_seq.observe(pkt.header.seq) {
            SeqStatus::InOrder => RecvStatus::Ok,
            SeqStatus::Gap { expected, actual } => {
                warn!(expected, actual, "sequence gap on data stream");
                self.stats.faults += 1;
                self.state = SessionState::Fault;
                RecvStatus::SequenceGap { expected, actual }
            }
        };

        if buf.len() < pkt.payload.len() {
            return Err(LinkError::PolicyViolation(format!(
                "recv buffer of {} bytes cannot hold a {}-byte packet",
                buf.len(),
                pkt.payload.len()
            )));
        }
        let n = pkt.payload.len();
        buf[..n].copy_from_slice(&pkt.payload);

        self.stats.packets += 1;
        self.stats.bytes += n as u64;
        self.stats.last_seq = pkt.header.seq;

        // Credit report upstream every ack_spacing packets.
        if self.spec.ack_spacing > 0 && self.stats.packets % u64::from(self.spec.ack_spacing) == 0 {
            self.send_credit(pkt.header.sid.reversed(), pkt.header.seq)?;
        }

        Ok((n, status))
    }

    /// Send at most one packet's worth of samples from `buf`.
    pub fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<(usize, SendStatus), LinkError> {
        self.enter_transfer()?;

        // Drain whatever the fabric sent back: credit and burst status.
        while let Some(pkt) = self.data_rx.try_poll()? {
            self.absorb_feedback(&pkt);
        }

        // A fault reported by the fabric freezes this call: no packet goes
        // out, no counter moves, the caller sees the status.
        if let Some(status) = self.pending_fault.take() {
            self.stats.faults += 1;
            self.state = SessionState::Fault;
            debug!(?status, "transmit fault reported");
            return Ok((0, status));
        }

        // Respect the downstream window before pushing more.
        if self.credit_window > 0 {
            let deadline = std::time::Instant::now() + timeout;
            while self.sent_count - self.acked_count >= u64::from(self.credit_window) {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    return Ok((0, SendStatus::Timeout));
                }
                match self.data_rx.poll(remaining) {
                    Ok(pkt) => {
                        self.absorb_feedback(&pkt);
                        if let Some(status) = self.pending_fault.take() {
                            self.stats.faults += 1;
                            self.state = SessionState::Fault;
                            return Ok((0, status));
                        }
                    }
                    Err(LinkError::Timeout) => return Ok((0, SendStatus::Timeout)),
                    Err(e) => return self.terminal(e),
                }
            }
        }

        let n = buf.len().min(self.spec.bytes_per_packet());
        let seq = self.tx_seq.take();
        let burst = if self.sent_sob {
            BurstFlags::None
        } else {
            self.sent_sob = true;
            BurstFlags::Start
        };
        let header = ChdrHeader::data(seq, self.data_sid).with_burst(burst);
        let frame = ChdrPacket::new(header, bytes::Bytes::copy_from_slice(&buf[..n])).encode();
        self.demux.send_frame(&frame, timeout)?;

        self.sent_count += 1;
        self.stats.packets += 1;
        self.stats.bytes += n as u64;
        self.stats.last_seq = seq;
        Ok((n, SendStatus::Ok))
    }

    /// Stop streaming: disable the source, drain stale packets so the next
    /// session on this transport starts clean, release everything.
    pub fn stop(&mut self) -> Result<SessionStats, LinkError> {
        match self.state {
            SessionState::Closed => return Ok(self.stats.clone()),
            SessionState::Streaming | SessionState::Fault => {
                if self.spec.direction == Direction::Rx {
                    if let Err(e) = self.blocks[0].set_stream_enable(false) {
                        warn!(error = %e, "disable on stop failed");
                    }
                } else {
                    // Close the burst so the sink knows we are done.
                    let header = ChdrHeader::data(self.tx_seq.take(), self.data_sid)
                        .with_burst(BurstFlags::End);
                    let frame = ChdrPacket::new(header, bytes::Bytes::new()).encode();
                    if let Err(e) = self.demux.send_frame(&frame, self.ctrl_timeout) {
                        warn!(error = %e, "end-of-burst on stop failed");
                    }
                }
                self.state = SessionState::Draining;
                let mut drained = 0usize;
                let deadline = std::time::Instant::now() + self.drain_timeout;
                loop {
                    let remaining =
                        deadline.saturating_duration_since(std::time::Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match self.data_rx.poll(remaining.min(Duration::from_millis(50))) {
                        Ok(_) => drained += 1,
                        Err(LinkError::Timeout) => break,
                        Err(_) => break,
                    }
                }
                if drained > 0 {
                    debug!(drained, "stale packets drained on stop");
                }
            }
            _ => {}
        }
        if let Some(t0) = self.started_at {
            self.stats.elapsed_secs = t0.elapsed().as_secs_f64();
        }
        self.state = SessionState::Closed;
        info!(packets = self.stats.packets, "session closed");
        Ok(self.stats.clone())
    }

    /// Current counters. Elapsed time is live while streaming.
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        if self.state != SessionState::Closed {
            if let Some(t0) = self.started_at {
                stats.elapsed_secs = t0.elapsed().as_secs_f64();
            }
        }
        stats
    }

    // ── internals ───────────────────────────────────────────────────────────

    /// Gate a transfer call on session state; a pending fault sub-state is
    /// recovered here — the previous call reported it.
    fn enter_transfer(&mut self) -> Result<(), LinkError> {
        match self.state {
            SessionState::Streaming => Ok(()),
            SessionState::Fault => {
                self.state = SessionState::Streaming;
                Ok(())
            }
            SessionState::Closed => Err(LinkError::Closed),
            other => Err(LinkError::PolicyViolation(format!(
                "transfer call in {other:?}"
            ))),
        }
    }

    fn absorb_feedback(&mut self, pkt: &ChdrPacket) {
        if pkt.header.packet_type != PacketType::Context {
            return;
        }
        match classify_context(pkt) {
            Some(DataContext::Credit(ack)) => {
                let delta = ack.seq_id.wrapping_sub(self.last_credit_seq) % SEQ_MODULUS;
                self.acked_count += u64::from(delta);
                self.last_credit_seq = ack.seq_id;
            }
            Some(DataContext::Burst(resp)) => {
                if let Some(status) = SendStatus::from_fault(resp.code) {
                    self.pending_fault = Some(status);
                }
            }
            None => {}
        }
    }

    fn send_credit(&mut self, to: Sid, seq: u16) -> Result<(), LinkError> {
        let header = ChdrHeader::context(seq, to);
        let frame = ChdrPacket::new(header, FlowCtrlAck { seq_id: seq }.to_bytes()).encode();
        self.demux.send_frame(&frame, self.ctrl_timeout)?;
        self.stats.acks_sent += 1;
        Ok(())
    }

    fn terminal<T>(&mut self, e: LinkError) -> Result<T, LinkError> {
        warn!(error = %e, "terminal transport error, closing session");
        self.state = SessionState::Closed;
        Err(e)
    }
}

fn check_edge_window(
    spec: &ChainSpec,
    window: u32,
    consumer_capacity_pkts: u32,
    producer_index: usize,
) -> Result<(), LinkError> {
    if consumer_capacity_pkts == 0 {
        return Err(LinkError::PolicyViolation(format!(
            "packets of {} bytes do not fit the buffer downstream of block \
             {producer_index}",
            spec.bytes_per_packet()
        )));
    }
    if window == 0 {
        // Disabling flow control toward a finite hardware buffer silently
        // drops data once the transfer outgrows it. Refuse.
        if !disable_is_sound(consumer_capacity_pkts, None) {
            return Err(LinkError::PolicyViolation(format!(
                "flow control disabled on block {producer_index} toward a \
                 {consumer_capacity_pkts}-packet buffer"
            )));
        }
        return Ok(());
    }
    if window > consumer_capacity_pkts {
        return Err(LinkError::PolicyViolation(format!(
            "window of {window} packets exceeds downstream capacity of \
             {consumer_capacity_pkts} ({} bytes/packet)",
            spec.bytes_per_packet()
        )));
    }
    Ok(())
}
