//! # Stream Identifiers
//!
//! A SID is a 32-bit value addressing one hop through the crossbar:
//! the high 16 bits are the source address, the low 16 the destination,
//! and each half splits into an 8-bit device number and an 8-bit endpoint.
//!
//! ```text
//!  31            24 23            16 15             8 7              0
//! +----------------+----------------+----------------+----------------+
//! |   src device   |  src endpoint  |   dst device   |  dst endpoint  |
//! +----------------+----------------+----------------+----------------+
//! ```
//!
//! The destination half always names the *next* hop, not the final
//! consumer — blocks rewrite it when forwarding, driven by their
//! next-destination register.

use std::fmt;

use crate::error::WireError;

/// A 32-bit crossbar stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(u32);

impl Sid {
    /// Build a SID from its four 8-bit components.
    pub fn new(src_device: u8, src_endpoint: u8, dst_device: u8, dst_endpoint: u8) -> Self {
        Sid(u32::from_be_bytes([
            src_device,
            src_endpoint,
            dst_device,
            dst_endpoint,
        ]))
    }

    /// Build a SID from wide component values, rejecting anything that does
    /// not fit the 8-bit fields.
    pub fn checked(
        src_device: u32,
        src_endpoint: u32,
        dst_device: u32,
        dst_endpoint: u32,
    ) -> Result<Self, WireError> {
        for &value in &[src_device, src_endpoint, dst_device, dst_endpoint] {
            if value > 0xFF {
                return Err(WireError::InvalidAddress { value });
            }
        }
        Ok(Sid::new(
            src_device as u8,
            src_endpoint as u8,
            dst_device as u8,
            dst_endpoint as u8,
        ))
    }

    /// Build a SID from two 16-bit addresses.
    pub fn from_addrs(src: u16, dst: u16) -> Self {
        Sid(((src as u32) << 16) | dst as u32)
    }

    /// The full 32-bit value.
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Source address (high 16 bits).
    #[inline]
    pub fn src_addr(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Destination address (low 16 bits).
    #[inline]
    pub fn dst_addr(self) -> u16 {
        self.0 as u16
    }

    #[inline]
    pub fn src_device(self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[inline]
    pub fn src_endpoint(self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[inline]
    pub fn dst_device(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub fn dst_endpoint(self) -> u8 {
        self.0 as u8
    }

    /// Same source, new destination address.
    pub fn with_dst(self, dst: u16) -> Self {
        Sid((self.0 & 0xFFFF_0000) | dst as u32)
    }

    /// Same destination, new source address.
    pub fn with_src(self, src: u16) -> Self {
        Sid((self.0 & 0x0000_FFFF) | ((src as u32) << 16))
    }

    /// Swap the source and destination halves.
    ///
    /// This is the return address for credit reports and acknowledgements.
    pub fn reversed(self) -> Self {
        Sid((self.0 << 16) | (self.0 >> 16))
    }
}

impl From<u32> for Sid {
    fn from(raw: u32) -> Self {
        Sid(raw)
    }
}

impl From<Sid> for u32 {
    fn from(sid: Sid) -> Self {
        sid.0
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({:#010x})", self.0)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}>{:02x}.{:02x}",
            self.src_device(),
            self.src_endpoint(),
            self.dst_device(),
            self.dst_endpoint()
        )
    }
}
