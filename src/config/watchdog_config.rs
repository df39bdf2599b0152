use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::bluetooth::{STALE_AFTER_MS, WATCHDOG_CHECK_INTERVAL_MS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Heartbeat gap after which the session is reported stale
    pub stale_after_ms: u64,
    /// How often a stale session is checked again
    pub check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: STALE_AFTER_MS,
            check_interval_ms: WATCHDOG_CHECK_INTERVAL_MS,
        }
    }
}

impl WatchdogConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}
