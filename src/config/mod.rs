pub mod connection_config;
pub mod watchdog_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::connection_config::ConnectionConfig;
use crate::config::watchdog_config::WatchdogConfig;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "sensor_board_config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub watchdog: WatchdogConfig,
}

impl AppConfig {
    /// Loads the config from `path`, falling back to defaults when the file is missing.
    pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = path.as_ref();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config to `path`, creating the parent directory if needed.
    pub async fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file_path = path.as_ref();
        if let Some(dir) = file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::RetryPolicy;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "sensor-board-monitor-{}-{}",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let config = AppConfig::load_config(scratch_dir("missing").join("nope.json"))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.connection.open_retry, RetryPolicy::new(5, 1000));
        assert_eq!(config.watchdog.stale_after_ms, 3000);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("nested").join(CONFIG_FILE_NAME);

        let mut config = AppConfig::default();
        config.connection.subscribe_retry = RetryPolicy::new(3, 250);
        config.connection.name_pattern = Some("^SensorBoard".into());
        config.watchdog.stale_after_ms = 5000;
        config.save_config(&path).await.unwrap();

        let loaded = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "connection": { "auto_reconnect": true } }"#).unwrap();
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.connection.settle_delay_ms, 1000);
        assert_eq!(config.watchdog, WatchdogConfig::default());
    }
}
