//! Wire-level error taxonomy.
//!
//! Every decode failure is fatal to the packet at hand, never to the session
//! consuming it — the caller decides whether to drop, report or retry.

use thiserror::Error;

/// Errors produced while encoding or decoding wire packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The VRLP magic was absent. Checked before any other field.
    #[error("bad link framing: expected VRLP magic, found {found:#010x}")]
    Framing { found: u32 },

    /// The buffer ended before the advertised frame did.
    #[error("truncated frame: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    /// Header carried a packet type nibble outside the known set.
    #[error("invalid packet type {0:#x}")]
    BadPacketType(u8),

    /// Both burst flag bits set — not a legal encoding.
    #[error("invalid burst flag encoding 0b11")]
    BadBurstFlags,

    /// A context payload did not match any known sub-format.
    /// Reported, not fatal: the stream carrying it stays usable.
    #[error("unknown context subtype (first word {0:#010x})")]
    UnknownContext(u32),

    /// A device or endpoint field does not fit in 8 bits.
    #[error("address component {value:#x} does not fit in 8 bits")]
    InvalidAddress { value: u32 },
}
