//! # Link transports
//!
//! One trait, two implementations. Every read and write is bounded by a
//! timeout — a stalled peer is observed as "no frame", never as a hang.
//! The handle is `Arc`-shared by every logical stream riding the link and
//! goes away with the last owner.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

/// Largest frame any supported link carries (jumbo Ethernet).
pub const MAX_FRAME: usize = 9000;

/// A shared, lossy, frame-oriented byte link.
///
/// Implementations must be usable from several threads at once; the
/// demultiplexer serializes pulls on top of this.
pub trait LinkTransport: Send + Sync {
    /// Send one frame, waiting at most `timeout` for link-level backpressure.
    fn send_frame(&self, frame: &[u8], timeout: Duration) -> io::Result<()>;

    /// Receive one frame. `Ok(None)` means the timeout elapsed with nothing
    /// to read — the normal idle outcome, not an error.
    fn recv_frame(&self, timeout: Duration) -> io::Result<Option<Bytes>>;
}

// ─── UDP ─────────────────────────────────────────────────────────────────────

/// UDP link to a fabric endpoint.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind locally and aim at the fabric's address.
    pub fn connect(bind: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        let peer = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no peer address"))?;
        debug!(local = %socket.local_addr()?, %peer, "udp link up");
        Ok(UdpTransport { socket, peer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl LinkTransport for UdpTransport {
    fn send_frame(&self, frame: &[u8], _timeout: Duration) -> io::Result<()> {
        // UDP sends don't block on the peer; a full local queue is an error.
        self.socket.send_to(frame, self.peer)?;
        Ok(())
    }

    fn recv_frame(&self, timeout: Duration) -> io::Result<Option<Bytes>> {
        // A zero read timeout would mean "block forever" to the socket API.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; MAX_FRAME];
        match self.socket.recv_from(&mut buf) {
            Ok((n, _from)) => {
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

// ─── Loopback ────────────────────────────────────────────────────────────────

/// In-memory link: two crossed bounded channels. Used by the test fabric
/// emulator and anywhere a session needs exercising without a device.
pub struct LoopbackTransport {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
}

impl LoopbackTransport {
    /// Create both ends of a link with the given per-direction depth.
    pub fn pair(depth: usize) -> (LoopbackTransport, LoopbackTransport) {
        let (a_tx, a_rx) = bounded(depth);
        let (b_tx, b_rx) = bounded(depth);
        (
            LoopbackTransport { tx: a_tx, rx: b_rx },
            LoopbackTransport { tx: b_tx, rx: a_rx },
        )
    }
}

impl LinkTransport for LoopbackTransport {
    fn send_frame(&self, frame: &[u8], timeout: Duration) -> io::Result<()> {
        self.tx
            .send_timeout(Bytes::copy_from_slice(frame), timeout)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer gone or full"))
    }

    fn recv_frame(&self, timeout: Duration) -> io::Result<Option<Bytes>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "loopback peer closed",
            )),
        }
    }
}
