//! Host-side error taxonomy.
//!
//! Hard failures only. Recoverable streaming conditions (sequence gaps,
//! underruns, overruns) travel as status values on every `recv`/`send` —
//! see [`crate::stream`] — so high-rate loops never pay for unwinding.

use thiserror::Error;

use gridlink_wire::WireError;

/// Errors surfaced by the control channel, demultiplexer and sessions.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No response or packet arrived within the bounded wait.
    /// Recoverable; the caller decides whether to retry.
    #[error("timed out waiting on the link")]
    Timeout,

    /// A response carried the wrong tag — a stale reply or a packet meant
    /// for someone else. Fatal to the in-flight request only.
    #[error("control response tag mismatch: expected {expected}, got {actual}")]
    Protocol { expected: u16, actual: u16 },

    /// Caller misuse rejected synchronously, never silently clamped.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Codec-level failure on a received frame.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The underlying byte transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The shared channel or session has been torn down.
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// Whether a streaming session can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Timeout | LinkError::Wire(_))
    }
}
