//! # Host configuration
//!
//! TOML-loadable knobs for the host stack plus the chain description the
//! operator binary streams with. Defaults suit loopback testing; a real
//! deployment overrides the transport section.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::{BlockSpec, ChainSpec, Direction};
use crate::error::LinkError;

/// Link and timing parameters for one host stack instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Register request/response bound, milliseconds.
    pub ctrl_timeout_ms: u64,
    /// How long `stop` keeps draining stale packets, milliseconds.
    pub drain_timeout_ms: u64,
    /// Orphan packets buffered for unregistered SIDs.
    pub unclaimed_capacity: usize,
    /// Depth of each registered per-SID queue.
    pub queue_depth: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            ctrl_timeout_ms: 500,
            drain_timeout_ms: 1000,
            unclaimed_capacity: 64,
            queue_depth: 512,
        }
    }
}

impl HostConfig {
    pub fn ctrl_timeout(&self) -> Duration {
        Duration::from_millis(self.ctrl_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Everything `grid-rx` needs: where the fabric is, how the stack behaves,
/// and the chain to stream through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub host: HostConfig,
    pub transport: TransportConfig,
    pub chain: ChainSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local UDP bind address.
    pub bind: String,
    /// Fabric endpoint address.
    pub peer: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            bind: "0.0.0.0:0".into(),
            peer: "192.168.10.2:49152".into(),
        }
    }
}

impl GridConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LinkError> {
        toml::from_str(text)
            .map_err(|e| LinkError::PolicyViolation(format!("bad configuration: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// A single-source receive chain on loopback addressing. The default
    /// used when no configuration file is given.
    pub fn loopback_default() -> Self {
        GridConfig {
            host: HostConfig::default(),
            transport: TransportConfig::default(),
            chain: ChainSpec {
                host_addr: 0x0001,
                host_ctrl_addr: 0x0002,
                blocks: vec![BlockSpec {
                    ctrl_addr: 0x0210,
                    data_addr: 0x0211,
                    window_pkts: 0,
                }],
                direction: Direction::Rx,
                fc_cycles_per_ack: 0,
                fc_packets_per_ack: 2,
                ack_spacing: 4,
                lines_per_packet: 50,
                rate_divider: 12,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.ctrl_timeout(), Duration::from_millis(500));
        assert!(cfg.queue_depth > 0);
    }

    #[test]
    fn full_config_roundtrip() {
        let cfg = GridConfig::loopback_default();
        let text = toml::to_string(&cfg).unwrap();
        let back = GridConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let text = r#"
[transport]
peer = "10.0.0.7:49152"

[chain]
host_addr = 1
host_ctrl_addr = 2
direction = "rx"
fc_cycles_per_ack = 0
fc_packets_per_ack = 2
ack_spacing = 4
lines_per_packet = 50
rate_divider = 12

[[chain.blocks]]
ctrl_addr = 528
data_addr = 529
window_pkts = 0
"#;
        let cfg = GridConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.host, HostConfig::default());
        assert_eq!(cfg.transport.peer, "10.0.0.7:49152");
        assert_eq!(cfg.transport.bind, "0.0.0.0:0");
        assert_eq!(cfg.chain.blocks.len(), 1);
    }

    #[test]
    fn garbage_config_fails_hard() {
        assert!(GridConfig::from_toml_str("not = valid [ toml").is_err());
    }
}
