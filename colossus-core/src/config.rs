use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Liveness and reconnect tuning for one event stream.
///
/// All fields carry defaults matching the backend's observed cadence, so a
/// partial configuration payload only overrides what it names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Interval at which the backend emits `ping` events (ms).
    pub heartbeat_interval_ms: u64,
    /// Slack around the expected heartbeat to absorb network jitter (ms).
    pub heartbeat_jitter_ms: u64,
    /// Consecutive failures tolerated before the stream is closed for good.
    pub max_retries: u32,
    /// Delay between a failure and the next connection attempt (ms).
    pub reconnect_backoff_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 45_000,
            heartbeat_jitter_ms: 5_000,
            max_retries: 3,
            reconnect_backoff_ms: 1_000,
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_jitter(&self) -> Duration {
        Duration::from_millis(self.heartbeat_jitter_ms)
    }

    /// `H - ε`: before this point the next heartbeat is not yet due.
    pub fn heartbeat_due_after(&self) -> Duration {
        self.heartbeat_interval()
            .saturating_sub(self.heartbeat_jitter())
    }

    /// `H + ε`: no heartbeat by this point is a liveness failure.
    pub fn heartbeat_deadline(&self) -> Duration {
        self.heartbeat_interval()
            .saturating_add(self.heartbeat_jitter())
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Replica affinity tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickyHostConfig {
    /// Host changes per resource after which drift is escalated.
    pub drift_threshold: u32,
    /// Candidate replicas probed by `resolve_best_host`.
    pub probe_candidates: u32,
    /// Per-probe timeout (ms).
    pub probe_timeout_ms: u64,
    /// Optional JSON file remembering the last host per resource.
    pub cache_path: Option<PathBuf>,
}

impl Default for StickyHostConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 4,
            probe_candidates: 3,
            probe_timeout_ms: 1_000,
            cache_path: None,
        }
    }
}

impl StickyHostConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_window_brackets_interval() {
        let config = StreamConfig::default();
        assert_eq!(config.heartbeat_due_after(), Duration::from_secs(40));
        assert_eq!(config.heartbeat_deadline(), Duration::from_secs(50));
    }

    #[test]
    fn partial_payload_keeps_defaults() {
        let config: StreamConfig =
            serde_json::from_str(r#"{ "max_retries": 7 }"#).unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.heartbeat_interval_ms, 45_000);
    }
}
