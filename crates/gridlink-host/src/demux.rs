//! # Packet demultiplexer
//!
//! One physical receive channel, many logical per-SID queues. The demux is
//! the single synchronization point over the shared transport: whichever
//! handle polls while the link is otherwise idle becomes the puller,
//! decodes arriving frames and routes them — its own packets returned
//! directly, everyone else's enqueued. Packets for SIDs nobody registered
//! land in a bounded unclaimed buffer, oldest dropped first, so a slow or
//! absent consumer can never back up the link.
//!
//! Concurrency contract: polls on distinct handles proceed independently;
//! at most one outstanding poll per handle (`poll` takes `&mut self`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use gridlink_wire::{ChdrPacket, Sid, WireError};

use crate::error::LinkError;
use crate::transport::LinkTransport;

/// How long a puller sits on the transport before letting others rotate in.
const PULL_SLICE: Duration = Duration::from_millis(20);
/// How long a waiter parks on its queue while someone else pulls.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Fan-out of one receive channel into per-SID queues.
pub struct Demux {
    transport: Arc<dyn LinkTransport>,
    registry: Mutex<HashMap<u32, Sender<ChdrPacket>>>,
    /// Held by whichever handle is currently draining the transport.
    pull_lock: Mutex<()>,
    unclaimed: Mutex<VecDeque<ChdrPacket>>,
    unclaimed_capacity: usize,
    queue_depth: usize,
}

impl Demux {
    pub fn new(transport: Arc<dyn LinkTransport>) -> Self {
        Demux::with_capacity(transport, 64, 512)
    }

    /// `unclaimed_capacity` bounds the orphan buffer; `queue_depth` bounds
    /// each registered queue.
    pub fn with_capacity(
        transport: Arc<dyn LinkTransport>,
        unclaimed_capacity: usize,
        queue_depth: usize,
    ) -> Self {
        Demux {
            transport,
            registry: Mutex::new(HashMap::new()),
            pull_lock: Mutex::new(()),
            unclaimed: Mutex::new(VecDeque::new()),
            unclaimed_capacity,
            queue_depth,
        }
    }

    /// Register interest in a SID. Unclaimed packets already buffered for it
    /// move into the new queue, preserving arrival order.
    pub fn register(self: &Arc<Self>, sid: Sid) -> Result<DemuxHandle, LinkError> {
        let (tx, rx) = bounded(self.queue_depth);
        {
            let mut registry = self.registry.lock().expect("demux registry poisoned");
            if registry.contains_key(&sid.value()) {
                return Err(LinkError::PolicyViolation(format!(
                    "sid {sid} already has a receiver"
                )));
            }
            let mut unclaimed = self.unclaimed.lock().expect("demux unclaimed poisoned");
            let mut kept = VecDeque::with_capacity(unclaimed.len());
            for pkt in unclaimed.drain(..) {
                if pkt.header.sid == sid {
                    let _ = tx.try_send(pkt);
                } else {
                    kept.push_back(pkt);
                }
            }
            *unclaimed = kept;
            registry.insert(sid.value(), tx);
        }
        debug!(%sid, "demux receiver registered");
        Ok(DemuxHandle {
            sid,
            rx,
            demux: Arc::clone(self),
        })
    }

    /// SIDs seen on the link that nobody has registered for.
    pub fn unclaimed_sids(&self) -> Vec<Sid> {
        let unclaimed = self.unclaimed.lock().expect("demux unclaimed poisoned");
        let mut sids: Vec<Sid> = unclaimed.iter().map(|p| p.header.sid).collect();
        sids.dedup();
        sids
    }

    /// Send one frame out the shared link.
    pub fn send_frame(&self, frame: &[u8], timeout: Duration) -> Result<(), LinkError> {
        self.transport.send_frame(frame, timeout)?;
        Ok(())
    }

    fn unregister(&self, sid: Sid) {
        let mut registry = self.registry.lock().expect("demux registry poisoned");
        registry.remove(&sid.value());
    }

    /// Deliver a pulled packet to whoever owns its SID.
    fn route(&self, pkt: ChdrPacket) {
        let sid = pkt.header.sid;
        let registry = self.registry.lock().expect("demux registry poisoned");
        if let Some(tx) = registry.get(&sid.value()) {
            if tx.try_send(pkt).is_err() {
                warn!(%sid, "receiver queue full, dropping packet");
            }
            return;
        }
        drop(registry);
        let mut unclaimed = self.unclaimed.lock().expect("demux unclaimed poisoned");
        while unclaimed.len() >= self.unclaimed_capacity {
            let dropped = unclaimed.pop_front();
            if let Some(d) = dropped {
                warn!(sid = %d.header.sid, "unclaimed buffer full, dropping oldest");
            }
        }
        unclaimed.push_back(pkt);
    }

    /// Pull and decode one frame, if any arrives within `timeout`.
    /// Decode failures are fatal to the frame, not to the channel.
    fn pull_one(&self, timeout: Duration) -> Result<Option<ChdrPacket>, LinkError> {
        let Some(frame) = self.transport.recv_frame(timeout)? else {
            return Ok(None);
        };
        match ChdrPacket::decode(&mut &frame[..]) {
            Ok(pkt) => Ok(Some(pkt)),
            Err(WireError::Framing { found }) => {
                warn!("non-VRLP frame on link ({found:#010x}), dropped");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "undecodable frame on link, dropped");
                Ok(None)
            }
        }
    }
}

/// One logical receive stream. At most one outstanding `poll` — enforced by
/// the `&mut` receiver.
pub struct DemuxHandle {
    sid: Sid,
    rx: Receiver<ChdrPacket>,
    demux: Arc<Demux>,
}

impl DemuxHandle {
    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Wait up to `timeout` for the next packet on this SID, pulling from
    /// the shared channel when the local queue is empty.
    pub fn poll(&mut self, timeout: Duration) -> Result<ChdrPacket, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(pkt) => return Ok(pkt),
                Err(TryRecvError::Disconnected) => return Err(LinkError::Closed),
                Err(TryRecvError::Empty) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout);
            }

            match self.demux.pull_lock.try_lock() {
                Ok(_pulling) => {
                    // Someone may have routed to us while we raced for the lock.
                    if let Ok(pkt) = self.rx.try_recv() {
                        return Ok(pkt);
                    }
                    let slice = remaining.min(PULL_SLICE);
                    if let Some(pkt) = self.demux.pull_one(slice)? {
                        if pkt.header.sid == self.sid {
                            // Queue is empty and we hold the pull lock, so
                            // returning directly cannot reorder.
                            return Ok(pkt);
                        }
                        self.demux.route(pkt);
                    }
                }
                Err(_) => {
                    // Another handle is draining the link; it will route to
                    // us. Park on the queue for a slice.
                    let slice = remaining.min(WAIT_SLICE);
                    if let Ok(pkt) = self.rx.recv_timeout(slice) {
                        return Ok(pkt);
                    }
                }
            }
        }
    }

    /// Non-blocking look: the local queue, then at most one opportunistic
    /// pull from the link.
    pub fn try_poll(&mut self) -> Result<Option<ChdrPacket>, LinkError> {
        match self.rx.try_recv() {
            Ok(pkt) => return Ok(Some(pkt)),
            Err(TryRecvError::Disconnected) => return Err(LinkError::Closed),
            Err(TryRecvError::Empty) => {}
        }
        if let Ok(_pulling) = self.demux.pull_lock.try_lock() {
            if let Ok(pkt) = self.rx.try_recv() {
                return Ok(Some(pkt));
            }
            if let Some(pkt) = self.demux.pull_one(Duration::from_millis(1))? {
                if pkt.header.sid == self.sid {
                    return Ok(Some(pkt));
                }
                self.demux.route(pkt);
            }
        }
        Ok(None)
    }
}

impl Drop for DemuxHandle {
    fn drop(&mut self) {
        self.demux.unregister(self.sid);
    }
}
