use thiserror::Error;

use crate::settings::ClientSettings;

/// Upper bound for `stream.heartbeat_interval_ms` (one day).
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Settings that parse but cannot work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} `{value}` is not a usable endpoint: {reason}")]
    InvalidEndpoint {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error(
        "stream.heartbeat_jitter_ms ({jitter_ms}) must be smaller than stream.heartbeat_interval_ms ({interval_ms})"
    )]
    JitterNotBelowInterval { jitter_ms: u64, interval_ms: u64 },

    #[error("stream.heartbeat_interval_ms ({interval_ms}) exceeds {max_ms}")]
    HeartbeatIntervalTooLong { interval_ms: u64, max_ms: u64 },

    #[error("sticky.probe_candidates must be at least 1")]
    NoProbeCandidates,

    #[error("sticky.drift_threshold must be at least 1")]
    ZeroDriftThreshold,
}

impl ClientSettings {
    /// Checks cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.colossus_url()?;
        self.builder_url()?;

        let stream = &self.stream;
        if stream.heartbeat_interval_ms > MAX_HEARTBEAT_INTERVAL_MS {
            return Err(SettingsError::HeartbeatIntervalTooLong {
                interval_ms: stream.heartbeat_interval_ms,
                max_ms: MAX_HEARTBEAT_INTERVAL_MS,
            });
        }
        if stream.heartbeat_jitter_ms >= stream.heartbeat_interval_ms {
            return Err(SettingsError::JitterNotBelowInterval {
                jitter_ms: stream.heartbeat_jitter_ms,
                interval_ms: stream.heartbeat_interval_ms,
            });
        }
        if self.sticky.probe_candidates == 0 {
            return Err(SettingsError::NoProbeCandidates);
        }
        if self.sticky.drift_threshold == 0 {
            return Err(SettingsError::ZeroDriftThreshold);
        }
        Ok(())
    }
}
