use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::bluetooth::{
    RetryPolicy, CONNECT_RETRY_DELAY_MS, DEFAULT_SCAN_DURATION_SECS, DISCOVERY_RETRY_DELAY_MS,
    INTER_SUBSYSTEM_DELAY_MS, MAX_CONNECT_RETRIES, MAX_DISCOVERY_RETRIES, MAX_SUBSCRIBE_RETRIES,
    MIN_RSSI_THRESHOLD, SERVICE_SETTLE_DELAY_MS, SUBSCRIBE_RETRY_DELAY_MS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retry budget for opening the link
    pub open_retry: RetryPolicy,

    /// Retry budget while waiting for the board to enumerate its services
    pub discovery_retry: RetryPolicy,

    /// Retry budget for each characteristic subscription
    pub subscribe_retry: RetryPolicy,

    /// Pause between discovery and the first subscription.
    /// Services reported present are not always usable straight away.
    pub settle_delay_ms: u64,

    /// Pause between starting two subsystems
    pub inter_subsystem_delay_ms: u64,

    pub scan_duration_secs: u64,

    /// Advertisements weaker than this are ignored
    pub min_rssi: i16,

    /// Only devices whose advertised name matches this regex are reported
    pub name_pattern: Option<String>,

    /// Reconnect to the last device when the session goes stale
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            open_retry: RetryPolicy::new(MAX_CONNECT_RETRIES, CONNECT_RETRY_DELAY_MS),
            discovery_retry: RetryPolicy::new(MAX_DISCOVERY_RETRIES, DISCOVERY_RETRY_DELAY_MS),
            subscribe_retry: RetryPolicy::new(MAX_SUBSCRIBE_RETRIES, SUBSCRIBE_RETRY_DELAY_MS),
            settle_delay_ms: SERVICE_SETTLE_DELAY_MS,
            inter_subsystem_delay_ms: INTER_SUBSYSTEM_DELAY_MS,
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            min_rssi: MIN_RSSI_THRESHOLD,
            name_pattern: None,
            auto_reconnect: false,
        }
    }
}

impl ConnectionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_subsystem_delay(&self) -> Duration {
        Duration::from_millis(self.inter_subsystem_delay_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}
