//! # Chain specifications
//!
//! A chain is the caller's description of the blocks a session should wire
//! together, upstream first. Port-to-address mapping is caller-supplied
//! configuration — the protocol layer never invents crossbar addresses.
//! The session turns a spec into an owned block table plus index-based
//! adjacency; blocks never hold references to each other.

use serde::{Deserialize, Serialize};

use gridlink_wire::regs::BYTES_PER_LINE;

use crate::error::LinkError;

/// Which way samples move relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Fabric → host.
    Rx,
    /// Host → fabric.
    Tx,
}

/// One block in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Crossbar address of the block's control endpoint.
    pub ctrl_addr: u16,
    /// Crossbar address its data traffic uses. Often equal to `ctrl_addr`
    /// with a different endpoint number; always the caller's choice.
    pub data_addr: u16,
    /// Downstream window granted to this block's output, in packets.
    /// Zero disables flow control on that edge (host-buffered peers only).
    pub window_pkts: u32,
}

/// Everything a session needs to assemble and configure a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// Host data endpoint address.
    pub host_addr: u16,
    /// Host control endpoint address.
    pub host_ctrl_addr: u16,
    pub direction: Direction,
    /// Credit-report cadences programmed into every block's input side.
    pub fc_cycles_per_ack: u32,
    pub fc_packets_per_ack: u32,
    /// Host sends a credit report upstream every this many received
    /// packets. Zero = never (host-side flow control off).
    pub ack_spacing: u32,
    /// Lines per packet programmed into data-producing blocks.
    pub lines_per_packet: u32,
    /// Inter-packet clock-cycle divider for rate-limited sources.
    pub rate_divider: u32,
    /// Blocks upstream → downstream. The last block talks to the host on
    /// an rx chain; the first receives from the host on a tx chain.
    pub blocks: Vec<BlockSpec>,
}

impl ChainSpec {
    /// Construction-time validation: misconfiguration fails hard, before
    /// any register is touched.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.blocks.is_empty() {
            return Err(LinkError::PolicyViolation(
                "a chain needs at least one block".into(),
            ));
        }
        if self.lines_per_packet == 0 {
            return Err(LinkError::PolicyViolation(
                "lines per packet must be nonzero".into(),
            ));
        }
        let mut addrs: Vec<u16> = self
            .blocks
            .iter()
            .flat_map(|b| [b.ctrl_addr, b.data_addr])
            .collect();
        addrs.push(self.host_addr);
        addrs.push(self.host_ctrl_addr);
        addrs.sort_unstable();
        for pair in addrs.windows(2) {
            if pair[0] == pair[1] {
                return Err(LinkError::PolicyViolation(format!(
                    "crossbar address {:#06x} used twice in chain",
                    pair[0]
                )));
            }
        }
        Ok(())
    }

    /// Data packet payload size in bytes.
    pub fn bytes_per_packet(&self) -> usize {
        self.lines_per_packet as usize * BYTES_PER_LINE
    }
}
