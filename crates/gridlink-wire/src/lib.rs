//! # gridlink-wire
//!
//! Wire protocol for the gridlink crossbar fabric.
//!
//! Pure logic — no I/O. Everything needed to frame, address and flow-control
//! packets traveling between a host and the processing blocks of an FPGA
//! crossbar: VRLP link framing, CHDR/VRT headers, stream identifiers,
//! context payloads and the settings-bus register encodings.
//!
//! ## Crate structure
//!
//! - [`sid`] — 32-bit stream identifiers (source/destination addressing)
//! - [`chdr`] — VRLP framing + CHDR header serialization
//! - [`context`] — typed context payloads (register traffic, credits, burst status)
//! - [`seq`] — 12-bit modular sequence tracking
//! - [`flow`] — flow-control register word encoding
//! - [`regs`] — settings-bus register map
//! - [`error`] — wire-level error taxonomy

pub mod chdr;
pub mod context;
pub mod error;
pub mod flow;
pub mod regs;
pub mod seq;
pub mod sid;

pub use chdr::{BurstFlags, ChdrHeader, ChdrPacket, PacketType};
pub use context::{CtrlResponse, CtrlWrite, FlowCtrlAck, TxErrorCode, TxResponse};
pub use error::WireError;
pub use seq::{Seq12, SeqStatus};
pub use sid::Sid;
