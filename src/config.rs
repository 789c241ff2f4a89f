use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use mac_address::MacAddress;
use serde_derive::Deserialize;

use crate::coordinator::SCAN_INTERVAL;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub mower: MowerConfig,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    pub discovery_prefix: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MowerConfig {
    pub address: MacAddress,
    /// Channel id the mower was paired with.
    pub channel_id: u32,
    pub poll_interval_seconds: Option<u64>,
    pub response_timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub timeout_seconds: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(
            self.scan
                .as_ref()
                .and_then(|s| s.timeout_seconds)
                .unwrap_or(10),
        )
    }
}

impl MowerConfig {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(SCAN_INTERVAL)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_seconds.unwrap_or(10))
    }
}
