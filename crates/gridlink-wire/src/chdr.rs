//! # VRLP framing and CHDR headers
//!
//! Every frame on the link, control or data, wears the same two layers:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    VRLP magic 0x56524C50                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     frame length (bytes)      |T T T T|B B| count |  sequence
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!    (12) |                      SID (32)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              optional 64-bit time (two words)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The CHDR word is: byte 0 = packet type nibble + 2-bit burst flags,
//! byte 1 = count byte whose bits [5:4] gate the time field, bytes 2..3 =
//! 12-bit sequence counter. All fields big-endian. The magic is validated
//! before anything else is looked at.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::sid::Sid;

// ─── Constants ───────────────────────────────────────────────────────────────

/// "VRLP", big-endian.
pub const VRLP_MAGIC: u32 = 0x5652_4C50;

/// VRLP preamble: magic + 16-bit frame length.
pub const VRLP_PREAMBLE_LEN: usize = 6;

/// CHDR word + SID, excluding the optional time field.
pub const CHDR_BASE_LEN: usize = 8;

/// Smallest legal frame: preamble + timeless header, empty payload.
pub const MIN_FRAME_LEN: usize = VRLP_PREAMBLE_LEN + CHDR_BASE_LEN;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Sequence counters are 12 bits and wrap at this modulus.
pub const SEQ_MODULUS: u16 = 1 << 12;

/// Time-present code in bits [5:4] of the count byte.
const TIME_CODE_PRESENT: u8 = 0b01;

// ─── Packet Type ─────────────────────────────────────────────────────────────

/// High nibble of the CHDR word. Only two values are legal on this fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Sample data with a stream identifier.
    Data = 0x1,
    /// Extension context: register traffic, credits, burst status.
    Context = 0x4,
}

impl PacketType {
    fn from_nibble(nibble: u8) -> Result<Self, WireError> {
        match nibble {
            0x1 => Ok(PacketType::Data),
            0x4 => Ok(PacketType::Context),
            other => Err(WireError::BadPacketType(other)),
        }
    }
}

// ─── Burst Flags ─────────────────────────────────────────────────────────────

/// Burst delimiters in the low two bits of the type byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum BurstFlags {
    /// Mid-burst or unframed.
    #[default]
    None = 0b00,
    /// End of burst.
    End = 0b01,
    /// Start of burst.
    Start = 0b10,
}

impl BurstFlags {
    fn from_bits(bits: u8) -> Result<Self, WireError> {
        match bits & 0b11 {
            0b00 => Ok(BurstFlags::None),
            0b01 => Ok(BurstFlags::End),
            0b10 => Ok(BurstFlags::Start),
            _ => Err(WireError::BadBurstFlags),
        }
    }
}

// ─── Header ──────────────────────────────────────────────────────────────────

/// Decoded CHDR header — present on every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChdrHeader {
    pub packet_type: PacketType,
    pub burst: BurstFlags,
    /// 12-bit sequence counter, monotonic modulo 4096 per SID.
    pub seq: u16,
    pub sid: Sid,
    /// Absolute fabric time, when present.
    pub time: Option<u64>,
}

impl ChdrHeader {
    /// Header for a sample-data frame.
    pub fn data(seq: u16, sid: Sid) -> Self {
        ChdrHeader {
            packet_type: PacketType::Data,
            burst: BurstFlags::None,
            seq: seq % SEQ_MODULUS,
            sid,
            time: None,
        }
    }

    /// Header for an extension-context frame.
    pub fn context(seq: u16, sid: Sid) -> Self {
        ChdrHeader {
            packet_type: PacketType::Context,
            burst: BurstFlags::None,
            seq: seq % SEQ_MODULUS,
            sid,
            time: None,
        }
    }

    pub fn with_burst(mut self, burst: BurstFlags) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    /// Encoded header size, excluding the VRLP preamble.
    pub fn encoded_len(&self) -> usize {
        CHDR_BASE_LEN + if self.time.is_some() { 8 } else { 0 }
    }

    /// Write the CHDR word, SID and optional time. The VRLP preamble is the
    /// frame's business, not the header's.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(((self.packet_type as u8) << 4) | self.burst as u8);
        let count = if self.time.is_some() {
            TIME_CODE_PRESENT << 4
        } else {
            0
        };
        buf.put_u8(count);
        buf.put_u16(self.seq & (SEQ_MODULUS - 1));
        buf.put_u32(self.sid.value());
        if let Some(t) = self.time {
            buf.put_u64(t);
        }
    }

    /// Decode the CHDR word, SID and optional time.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < CHDR_BASE_LEN {
            return Err(WireError::Truncated {
                needed: CHDR_BASE_LEN,
                available: buf.remaining(),
            });
        }
        let type_byte = buf.get_u8();
        let packet_type = PacketType::from_nibble(type_byte >> 4)?;
        let burst = BurstFlags::from_bits(type_byte)?;
        let count = buf.get_u8();
        let has_time = (count >> 4) & 0b11 == TIME_CODE_PRESENT;
        let seq = buf.get_u16() & (SEQ_MODULUS - 1);
        let sid = Sid::from(buf.get_u32());
        let time = if has_time {
            if buf.remaining() < 8 {
                return Err(WireError::Truncated {
                    needed: 8,
                    available: buf.remaining(),
                });
            }
            Some(buf.get_u64())
        } else {
            None
        };
        Ok(ChdrHeader {
            packet_type,
            burst,
            seq,
            sid,
            time,
        })
    }
}

// ─── Full Frame ──────────────────────────────────────────────────────────────

/// A complete frame: header plus payload, ready for the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChdrPacket {
    pub header: ChdrHeader,
    pub payload: Bytes,
}

impl ChdrPacket {
    pub fn new(header: ChdrHeader, payload: Bytes) -> Self {
        ChdrPacket { header, payload }
    }

    /// Total on-wire size including the VRLP preamble.
    pub fn frame_len(&self) -> usize {
        VRLP_PREAMBLE_LEN + self.header.encoded_len() + self.payload.len()
    }

    /// Serialize preamble + header + payload into a fresh buffer.
    ///
    /// Panics if the frame would not fit the 16-bit length field; callers
    /// bound payload sizes long before this point (packets are at most one
    /// FIFO's worth of lines).
    pub fn encode(&self) -> BytesMut {
        let total = self.frame_len();
        debug_assert!(total <= MAX_FRAME_LEN, "frame exceeds VRLP length field");
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(VRLP_MAGIC);
        buf.put_u16(total as u16);
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one frame. The VRLP magic is validated before any other field
    /// is touched; a wrong magic is a framing error even if the rest of the
    /// buffer happens to parse.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::Truncated {
                needed: 4,
                available: buf.remaining(),
            });
        }
        let magic = buf.get_u32();
        if magic != VRLP_MAGIC {
            return Err(WireError::Framing { found: magic });
        }
        if buf.remaining() < 2 {
            return Err(WireError::Truncated {
                needed: 2,
                available: buf.remaining(),
            });
        }
        let frame_len = buf.get_u16() as usize;
        if frame_len < MIN_FRAME_LEN {
            return Err(WireError::Truncated {
                needed: MIN_FRAME_LEN,
                available: frame_len,
            });
        }
        let body_len = frame_len - VRLP_PREAMBLE_LEN;
        if buf.remaining() < body_len {
            return Err(WireError::Truncated {
                needed: body_len,
                available: buf.remaining(),
            });
        }
        let header = ChdrHeader::decode(buf)?;
        // A frame whose length word contradicts its own header (e.g. a time
        // field the advertised size cannot hold) is truncated, not parsed.
        let Some(payload_len) = body_len.checked_sub(header.encoded_len()) else {
            return Err(WireError::Truncated {
                needed: header.encoded_len(),
                available: body_len,
            });
        };
        let payload = buf.copy_to_bytes(payload_len);
        Ok(ChdrPacket { header, payload })
    }
}
