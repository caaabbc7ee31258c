use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Raw sample value recorded for a failed probe.
pub const FAILED_SAMPLE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Icmp,
    Tcp,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMethod::Icmp => write!(f, "icmp"),
            ProbeMethod::Tcp => write!(f, "tcp"),
        }
    }
}

/// Result of one probe call for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable { latency_ms: u64, method: ProbeMethod },
    Unreachable,
}

impl ProbeOutcome {
    pub fn reachable(latency_ms: u64, method: ProbeMethod) -> Self {
        Self::Reachable { latency_ms, method }
    }

    /// Raw sample form stored in host history: latency in ms, or `-1` on failure.
    pub fn sample(&self) -> i64 {
        match self {
            ProbeOutcome::Reachable { latency_ms, .. } => {
                i64::try_from(*latency_ms).unwrap_or(i64::MAX)
            }
            ProbeOutcome::Unreachable => FAILED_SAMPLE,
        }
    }
}

/// Point-in-time statistics for one host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStats {
    pub host: String,
    /// `-1` when the latest probe failed or nothing has been probed yet.
    pub last_latency_ms: i64,
    pub avg_latency_ms: f64,
    pub packets_sent: u64,
    pub packets_lost: u64,
}

impl HostStats {
    pub fn packet_loss_percent(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64 * 100.0
        }
    }
}

impl Serialize for HostStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("HostStats", 6)?;
        state.serialize_field("host", &self.host)?;
        state.serialize_field("lastLatencyMs", &self.last_latency_ms)?;
        state.serialize_field("avgLatencyMs", &self.avg_latency_ms)?;
        state.serialize_field("packetsSent", &self.packets_sent)?;
        state.serialize_field("packetsLost", &self.packets_lost)?;
        state.serialize_field("packetLossPercent", &self.packet_loss_percent())?;
        state.end()
    }
}

/// Statistics of every known host, keyed by host name.
pub type Snapshot = BTreeMap<String, HostStats>;
