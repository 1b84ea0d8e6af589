//! # Context payloads
//!
//! Extension-context frames carry one of four fixed payload sub-formats,
//! keyed by which endpoint class the frame was addressed to — the codec
//! does not guess, the caller picks the decoder matching the endpoint it
//! owns. All words big-endian.
//!
//! - [`CtrlWrite`] — settings-bus write request (host → block)
//! - [`CtrlResponse`] — 64-bit readback acknowledgement (block → host)
//! - [`FlowCtrlAck`] — downstream credit report (consumer → producer)
//! - [`TxResponse`] — burst status / error report (block → host)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

fn need(buf: &impl Buf, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        Err(WireError::Truncated {
            needed,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

// ─── Register write ──────────────────────────────────────────────────────────

/// A settings-bus write: line address plus 32-bit data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlWrite {
    /// Line address (register number × access stride).
    pub addr: u32,
    pub data: u32,
}

impl CtrlWrite {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.addr);
        buf.put_u32(self.data);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        Ok(CtrlWrite {
            addr: buf.get_u32(),
            data: buf.get_u32(),
        })
    }
}

// ─── Register readback ───────────────────────────────────────────────────────

/// Acknowledgement for a settings-bus write, carrying the 64-bit word
/// currently selected by the readback mux. Doubles as the read response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlResponse {
    pub data: u64,
}

impl CtrlResponse {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.data);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        Ok(CtrlResponse {
            data: buf.get_u64(),
        })
    }
}

// ─── Flow-control credit ─────────────────────────────────────────────────────

/// Credit report: the consumer has retired everything up to `seq_id`.
/// Carried in one 32-bit word, low 16 bits significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowCtrlAck {
    pub seq_id: u16,
}

impl FlowCtrlAck {
    pub const ENCODED_LEN: usize = 4;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq_id as u32);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        Ok(FlowCtrlAck {
            seq_id: buf.get_u32() as u16,
        })
    }
}

// ─── Burst status ────────────────────────────────────────────────────────────

/// The six fixed transmit status codes. Anything else on the wire is an
/// unknown context, reported but not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TxErrorCode {
    /// Packet accepted.
    Ack = 0x0,
    /// End-of-burst observed.
    Eob = 0x1,
    /// Sample FIFO ran dry mid-stream.
    Underrun = 0x2,
    /// Packet sequence number out of order between bursts.
    SeqError = 0x3,
    /// Timed packet arrived after its time had passed.
    TimeError = 0x4,
    /// Sequence number out of order inside a burst.
    MidBurstSeqError = 0x5,
}

impl TxErrorCode {
    pub fn from_word(word: u32) -> Result<Self, WireError> {
        match word {
            0x0 => Ok(TxErrorCode::Ack),
            0x1 => Ok(TxErrorCode::Eob),
            0x2 => Ok(TxErrorCode::Underrun),
            0x3 => Ok(TxErrorCode::SeqError),
            0x4 => Ok(TxErrorCode::TimeError),
            0x5 => Ok(TxErrorCode::MidBurstSeqError),
            other => Err(WireError::UnknownContext(other)),
        }
    }

    /// Whether this code signals a fault rather than routine progress.
    pub fn is_fault(self) -> bool {
        !matches!(self, TxErrorCode::Ack | TxErrorCode::Eob)
    }
}

/// Burst status report: error code plus the sequence id it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxResponse {
    pub code: TxErrorCode,
    pub seq_id: u32,
}

impl TxResponse {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.code as u32);
        buf.put_u32(self.seq_id);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        let code = TxErrorCode::from_word(buf.get_u32())?;
        Ok(TxResponse {
            code,
            seq_id: buf.get_u32(),
        })
    }
}
