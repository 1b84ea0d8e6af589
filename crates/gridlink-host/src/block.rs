//! # Block controller
//!
//! One controller per FPGA block. Attaching runs the fixed discovery
//! sequence — identity word, then the two buffer-allocation words — and
//! everything after that is idempotent register programming: routing,
//! flow-control cadences, packet sizing, stream enable. Controllers never
//! own their neighbours; the chain records upstream links as indices into
//! the session's block table.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use gridlink_wire::flow::{cadence_word, window_registers};
use gridlink_wire::regs::{
    FLOW_CTRL_CLEAR_SENTINEL, BYTES_PER_LINE, RB_BUF_ALLOC0, RB_BUF_ALLOC1, RB_ID,
    SR_FLOW_CTRL_CLR_SEQ, SR_FLOW_CTRL_CYCS_PER_ACK, SR_FLOW_CTRL_PKTS_PER_ACK,
    SR_FLOW_CTRL_WINDOW_EN, SR_FLOW_CTRL_WINDOW_SIZE, SR_LINES_PER_PACKET, SR_NEXT_DST,
    SR_RATE_DIVIDER, SR_STREAM_ENABLE,
};
use gridlink_wire::Sid;

use crate::ctrl::CtrlChannel;
use crate::demux::Demux;
use crate::error::LinkError;

/// Identity values with this pattern in the upper 16 bits mark the
/// specialized source/sink blocks baked into every fabric image.
pub const SOURCE_SINK_ID_PATTERN: u16 = 0xAAAA;

/// Block-wide default when no per-port override is set.
pub const DEFAULT_BYTES_PER_PACKET: usize = 1400;

/// Fabric clock until a rate is discovered or configured.
pub const DEFAULT_CLOCK_RATE: f64 = 160e6;

/// Every block has up to this many input ports.
pub const MAX_PORTS: usize = 16;

/// Bit 16 of the next-destination register arms SID-based routing.
const NEXT_DST_USE_SID: u32 = 1 << 16;

/// What a block's identity says about it. Affects only the assigned name,
/// never protocol behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// Specialized source/sink block.
    SourceSink,
    /// Generic processing block.
    Processing,
}

impl BlockClass {
    pub fn classify(identity: u64) -> Self {
        if (identity >> 48) as u16 == SOURCE_SINK_ID_PATTERN {
            BlockClass::SourceSink
        } else {
            BlockClass::Processing
        }
    }

    fn base_name(self) -> &'static str {
        match self {
            BlockClass::SourceSink => "SrcSink",
            BlockClass::Processing => "CE",
        }
    }
}

/// Discovered block state. Rebuilt from registers on every attach; nothing
/// persists FPGA-side beyond the registers themselves.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub identity: u64,
    pub class: BlockClass,
    pub name: String,
    /// Input buffer size in bytes per port.
    pub fifo_sizes: [usize; MAX_PORTS],
    pub clock_rate: f64,
}

/// Controller for one block's settings bus.
pub struct BlockController {
    ctrl: CtrlChannel,
    desc: BlockDescriptor,
    /// Per-output-port bytes-per-packet overrides.
    bpp_override: Vec<Option<usize>>,
    default_bpp: usize,
    /// Upstream peers as indices into the session's block table. Non-owning.
    upstream: Vec<usize>,
}

impl BlockController {
    /// Attach to the block at `sid`'s destination, running discovery.
    /// `taken_names` is the set already assigned in this session; the
    /// chosen name is appended to it.
    pub fn attach(
        demux: &Arc<Demux>,
        sid: Sid,
        timeout: Duration,
        taken_names: &mut HashSet<String>,
    ) -> Result<Self, LinkError> {
        let mut ctrl = CtrlChannel::open(demux, sid, timeout)?;

        let identity = ctrl.peek64(RB_ID)?;
        let class = BlockClass::classify(identity);

        let mut fifo_sizes = [0usize; MAX_PORTS];
        for (half, reg) in [RB_BUF_ALLOC0, RB_BUF_ALLOC1].into_iter().enumerate() {
            let word = ctrl.peek64(reg)?;
            for i in 0..8 {
                // One byte per port: log2 of the line count.
                let log2_lines = ((word >> (i * 8)) & 0xFF) as u32;
                fifo_sizes[half * 8 + i] = BYTES_PER_LINE
                    .checked_shl(log2_lines)
                    .unwrap_or(usize::MAX);
            }
        }

        let mut index = 0usize;
        let name = loop {
            let candidate = format!("{}_{index}", class.base_name());
            if !taken_names.contains(&candidate) {
                break candidate;
            }
            index += 1;
        };
        taken_names.insert(name.clone());

        info!(%sid, block = %name, "block attached, identity {identity:#018x}");

        Ok(BlockController {
            ctrl,
            desc: BlockDescriptor {
                identity,
                class,
                name,
                fifo_sizes,
                clock_rate: DEFAULT_CLOCK_RATE,
            },
            bpp_override: vec![None; MAX_PORTS],
            default_bpp: DEFAULT_BYTES_PER_PACKET,
            upstream: Vec::new(),
        })
    }

    pub fn descriptor(&self) -> &BlockDescriptor {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn identity(&self) -> u64 {
        self.desc.identity
    }

    pub fn class(&self) -> BlockClass {
        self.desc.class
    }

    pub fn ctrl_sid(&self) -> Sid {
        self.ctrl.sid()
    }

    /// Input buffer capacity in bytes for one port.
    pub fn get_fifo_size(&self, port: usize) -> usize {
        self.desc.fifo_sizes.get(port).copied().unwrap_or(0)
    }

    pub fn get_clock_rate(&self) -> f64 {
        self.desc.clock_rate
    }

    pub fn set_clock_rate(&mut self, rate: f64) {
        self.desc.clock_rate = rate;
    }

    /// Program the next hop for an output port.
    pub fn set_destination(&mut self, port: usize, next_addr: u16) -> Result<(), LinkError> {
        debug!(block = self.name(), port, "set destination {next_addr:#06x}");
        self.ctrl
            .poke32(SR_NEXT_DST, NEXT_DST_USE_SID | u32::from(next_addr))?;
        Ok(())
    }

    /// Program the credit-report cadences for this block's input side.
    /// Zero disables either cadence.
    pub fn configure_flow_control_in(
        &mut self,
        cycles: u32,
        packets: u32,
    ) -> Result<(), LinkError> {
        debug!(block = self.name(), cycles, packets, "flow control in");
        self.ctrl
            .poke32(SR_FLOW_CTRL_CYCS_PER_ACK, cadence_word(cycles))?;
        self.ctrl
            .poke32(SR_FLOW_CTRL_PKTS_PER_ACK, cadence_word(packets))?;
        Ok(())
    }

    /// Program the downstream window for this block's output side.
    /// `buf_size_pkts == 0` disables flow control — sound only when the peer
    /// buffers host-side; the chain layer refuses unsound disables.
    pub fn configure_flow_control_out(
        &mut self,
        buf_size_pkts: u32,
        peer: Sid,
    ) -> Result<(), LinkError> {
        debug!(block = self.name(), buf_size_pkts, %peer, "flow control out");
        let (window, enable) = window_registers(buf_size_pkts);
        self.ctrl.poke32(SR_FLOW_CTRL_WINDOW_SIZE, window)?;
        self.ctrl.poke32(SR_FLOW_CTRL_WINDOW_EN, enable)?;
        Ok(())
    }

    /// Clear sequence and credit state. Any value clears; the sentinel
    /// spells CLEAR in captures.
    pub fn reset_flow_control(&mut self) -> Result<(), LinkError> {
        self.ctrl
            .poke32(SR_FLOW_CTRL_CLR_SEQ, FLOW_CTRL_CLEAR_SENTINEL)?;
        Ok(())
    }

    /// Set the per-port output packet size. Rejected (not clamped) when not
    /// a whole number of lines.
    pub fn set_bytes_per_output_packet(
        &mut self,
        bpp: usize,
        port: usize,
    ) -> Result<(), LinkError> {
        if bpp % BYTES_PER_LINE != 0 {
            return Err(LinkError::PolicyViolation(format!(
                "{bpp} bytes per packet is not a multiple of the {BYTES_PER_LINE}-byte line"
            )));
        }
        if port >= MAX_PORTS {
            return Err(LinkError::PolicyViolation(format!(
                "output port {port} out of range"
            )));
        }
        self.bpp_override[port] = Some(bpp);
        Ok(())
    }

    /// Per-port override, falling back to the block-wide default.
    pub fn get_bytes_per_output_packet(&self, port: usize) -> usize {
        self.bpp_override
            .get(port)
            .copied()
            .flatten()
            .unwrap_or(self.default_bpp)
    }

    /// Lines per produced packet (data-producing blocks).
    pub fn set_lines_per_packet(&mut self, lines: u32) -> Result<(), LinkError> {
        self.ctrl.poke32(SR_LINES_PER_PACKET, lines)?;
        Ok(())
    }

    /// Clock cycles between produced packets.
    pub fn set_rate_divider(&mut self, divider: u32) -> Result<(), LinkError> {
        self.ctrl.poke32(SR_RATE_DIVIDER, divider)?;
        Ok(())
    }

    /// Streaming enable bit.
    pub fn set_stream_enable(&mut self, enabled: bool) -> Result<(), LinkError> {
        debug!(block = self.name(), enabled, "stream enable");
        self.ctrl.poke32(SR_STREAM_ENABLE, u32::from(enabled))?;
        Ok(())
    }

    /// Record an upstream peer as an index into the session's block table.
    pub fn register_upstream_block(&mut self, index: usize) {
        self.upstream.push(index);
    }

    pub fn upstream_blocks(&self) -> &[usize] {
        &self.upstream
    }
}
