//! # Register control channel
//!
//! Synchronous request/response over the packet codec. Every request is a
//! context frame carrying a settings-bus write; its 12-bit sequence number
//! is the tag the acknowledgement must echo. A mismatched tag is a protocol
//! error (a stale reply or someone else's traffic), never silently accepted.
//! No acknowledgement within the bound is a timeout — register writes are
//! idempotent and may be retried by the caller; reads with unknown side
//! effects must not be.
//!
//! Reads go the way the hardware does them: a write to the readback mux
//! selects which 64-bit word the next acknowledgement carries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use gridlink_wire::regs::{sr_addr, sr_addr64, SR_READBACK};
use gridlink_wire::seq::SeqGen;
use gridlink_wire::{ChdrHeader, ChdrPacket, CtrlResponse, CtrlWrite, Sid};

use crate::demux::{Demux, DemuxHandle};
use crate::error::LinkError;

/// One block's control endpoint. Not internally locked: callers own a
/// channel and serialize access themselves (one owning thread per block).
pub struct CtrlChannel {
    /// Host control endpoint → block control address.
    sid: Sid,
    demux: Arc<Demux>,
    responses: DemuxHandle,
    tags: SeqGen,
    timeout: Duration,
}

impl CtrlChannel {
    /// Open a control channel. Responses arrive on the reversed SID.
    pub fn open(demux: &Arc<Demux>, sid: Sid, timeout: Duration) -> Result<Self, LinkError> {
        let responses = demux.register(sid.reversed())?;
        Ok(CtrlChannel {
            sid,
            demux: Arc::clone(demux),
            responses,
            tags: SeqGen::new(),
            timeout,
        })
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Write a 32-bit settings-bus register and return the 64-bit readback
    /// word the acknowledgement carries.
    pub fn poke32(&mut self, reg: u32, data: u32) -> Result<u64, LinkError> {
        self.transact(sr_addr(reg), data)
    }

    /// Read the 64-bit readback word `reg` by selecting it on the mux.
    pub fn peek64(&mut self, reg: u32) -> Result<u64, LinkError> {
        self.transact(sr_addr(SR_READBACK), sr_addr64(reg))
    }

    /// Read the low half of a readback word.
    pub fn peek32(&mut self, reg: u32) -> Result<u32, LinkError> {
        Ok(self.transact(sr_addr(SR_READBACK), sr_addr(reg))? as u32)
    }

    fn transact(&mut self, addr: u32, data: u32) -> Result<u64, LinkError> {
        let tag = self.tags.take();
        trace!(sid = %self.sid, tag, addr, "ctrl request, data {data:#010x}");

        let header = ChdrHeader::context(tag, self.sid);
        let payload = CtrlWrite { addr, data }.to_bytes();
        let frame = ChdrPacket::new(header, payload).encode();
        self.demux.send_frame(&frame, self.timeout)?;

        let pkt = match self.responses.poll(self.timeout) {
            Ok(pkt) => pkt,
            Err(LinkError::Timeout) => {
                debug!(sid = %self.sid, tag, "ctrl response timed out");
                return Err(LinkError::Timeout);
            }
            Err(e) => return Err(e),
        };
        if pkt.header.seq != tag {
            return Err(LinkError::Protocol {
                expected: tag,
                actual: pkt.header.seq,
            });
        }
        let resp = CtrlResponse::decode(&mut &pkt.payload[..])?;
        Ok(resp.data)
    }
}
