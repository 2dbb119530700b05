//! Session configuration
//!
//! Every field has a default; a JSON document only needs to carry overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How this device presents itself to the rest of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub avatar: Option<String>,
    pub uid: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Listener".to_string(),
            avatar: None,
            uid: None,
        }
    }
}

/// Timing and identity settings for a session coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub profile: Profile,
    /// Minimum spacing between two invocations of the same local intent
    pub debounce_ms: u64,
    /// How far ahead the host schedules a resume so the broadcast lands first
    pub resume_lead_ms: u64,
    /// Keep-alive / clock probe interval
    pub heartbeat_interval_ms: u64,
    /// Wait before sending the first snapshot to a newly connected peer
    pub peer_grace_ms: u64,
    /// How long a remotely synced media id suppresses local track-change broadcasts
    pub echo_window_ms: u64,
    /// A probe without a Pong after this long counts as missed
    pub ping_timeout_ms: u64,
    /// Consecutive missed probes before sync status drops to error
    pub max_missed_pings: u32,
    /// EMA weight of each new clock offset sample (0.0-1.0)
    pub clock_smoothing: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            debounce_ms: 500,
            resume_lead_ms: 300,
            heartbeat_interval_ms: 5_000,
            peer_grace_ms: 1_000,
            echo_window_ms: 3_000,
            ping_timeout_ms: 3_000,
            max_missed_pings: 3,
            clock_smoothing: 0.3,
        }
    }
}

impl SyncConfig {
    /// Parse overrides from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.profile.name = name.into();
        self
    }

    pub fn resume_lead(&self) -> Duration {
        Duration::from_millis(self.resume_lead_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn peer_grace(&self) -> Duration {
        Duration::from_millis(self.peer_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.resume_lead(), Duration::from_millis(300));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.profile.name, "Listener");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            SyncConfig::from_json(r#"{"debounce_ms": 250, "profile": {"name": "Ada"}}"#).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.profile.name, "Ada");
        assert_eq!(config.profile.avatar, None);
        assert_eq!(config.echo_window_ms, 3_000);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(SyncConfig::from_json("{ not json").is_err());
    }
}
