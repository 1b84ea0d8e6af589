//! Settings-bus register map.
//!
//! These addresses are a hardware contract shared with the FPGA images —
//! they are not negotiable at the protocol layer. Registers are
//! line-addressed: a register number is multiplied by the access stride
//! (4 bytes for 32-bit pokes, 8 bytes for 64-bit readback).

/// One settings-bus / FIFO line is 64 bits.
pub const BYTES_PER_LINE: usize = 8;

// ── Write registers ──────────────────────────────────────────────────────────

/// Flow control: clock cycles between credit reports (bit 31 = enable).
pub const SR_FLOW_CTRL_CYCS_PER_ACK: u32 = 0;
/// Flow control: packets between credit reports (bit 31 = enable).
pub const SR_FLOW_CTRL_PKTS_PER_ACK: u32 = 1;
/// Flow control: downstream window size, programmed as packets − 1.
pub const SR_FLOW_CTRL_WINDOW_SIZE: u32 = 2;
/// Flow control: window enable (bit 0).
pub const SR_FLOW_CTRL_WINDOW_EN: u32 = 3;
/// Flow control: clear sequence/credit state. Any write clears.
pub const SR_FLOW_CTRL_CLR_SEQ: u32 = 6;
/// Next-destination SID (low 16 bits) with routing enable at bit 16.
pub const SR_NEXT_DST: u32 = 8;
/// Lines per output packet (data-producing blocks).
pub const SR_LINES_PER_PACKET: u32 = 9;
/// Inter-packet clock-cycle divider.
pub const SR_RATE_DIVIDER: u32 = 10;
/// Streaming enable (bit 0).
pub const SR_STREAM_ENABLE: u32 = 11;
/// Readback mux select: which 64-bit word the next ack carries.
pub const SR_READBACK: u32 = 32;

/// Sentinel written to [`SR_FLOW_CTRL_CLR_SEQ`]. The hardware clears on any
/// write; the value spells "CLEAR" for capture readability.
pub const FLOW_CTRL_CLEAR_SENTINEL: u32 = 0x00C1_EA12;

// ── 64-bit readback words ────────────────────────────────────────────────────

/// Block identity code.
pub const RB_ID: u32 = 0;
/// Buffer allocation, input ports 0..8 (one log2-lines byte per port).
pub const RB_BUF_ALLOC0: u32 = 1;
/// Buffer allocation, input ports 8..16.
pub const RB_BUF_ALLOC1: u32 = 2;

/// Line address for a 32-bit register access.
#[inline]
pub fn sr_addr(reg: u32) -> u32 {
    reg * 4
}

/// Line address for a 64-bit readback access.
#[inline]
pub fn sr_addr64(reg: u32) -> u32 {
    reg * 8
}
