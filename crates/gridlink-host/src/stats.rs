//! # Session statistics
//!
//! Counters a session keeps while streaming. Serializable for JSON dumps
//! and the operator binary's exit summary.

use serde::Serialize;

/// Aggregate counters for one streaming session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Data packets transferred (faulting calls do not count).
    pub packets: u64,
    /// Payload bytes transferred.
    pub bytes: u64,
    /// Seconds since `start`, fixed at `stop`.
    pub elapsed_secs: f64,
    /// Most recent sequence number seen or sent.
    pub last_seq: u16,
    /// Recoverable faults observed (gaps, underruns, overruns).
    pub faults: u64,
    /// Credit reports sent upstream.
    pub acks_sent: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean payload throughput in bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.bytes as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}
