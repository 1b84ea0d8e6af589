//! # gridlink-host
//!
//! Host side of the gridlink crossbar stack: everything between a byte
//! transport and a client moving samples through a chain of FPGA blocks.
//!
//! ## Crate structure
//!
//! - [`transport`] — blocking-with-timeout link abstraction (UDP, loopback)
//! - [`demux`] — one physical channel fanned out to per-SID queues
//! - [`ctrl`] — synchronous tag-matched register control channel
//! - [`block`] — per-block controller: discovery, routing, flow control
//! - [`chain`] — chain specifications and the session-owned block table
//! - [`stream`] — the streaming session state machine
//! - [`stats`] — per-session counters
//! - [`config`] — TOML host configuration
//!
//! A session is wired from injected parts — transport, demultiplexer and
//! configuration ride in a [`HostContext`](stream::HostContext) so sessions
//! stay independently testable. Nothing in here is a process-wide singleton.

pub mod block;
pub mod chain;
pub mod config;
pub mod ctrl;
pub mod demux;
pub mod error;
pub mod stats;
pub mod stream;
pub mod transport;

pub use chain::{ChainSpec, Direction};
pub use error::LinkError;
pub use stream::{HostContext, RecvStatus, SendStatus, StreamMode, StreamSession};
