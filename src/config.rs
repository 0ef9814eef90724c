use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::echo::DEFAULT_PORT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity this host answers pings with; falls back to $HOSTNAME.
    pub name: String,
    /// Address the echo server binds to.
    pub bind_addr: String,
    /// Base URL of the management service.
    pub url: String,
    /// API key sent with every management-service request.
    pub api_key: String,
    /// Heartbeat interval in seconds.
    pub interval_secs: u64,
    /// Random jitter applied to the interval, in seconds.
    pub jitter_secs: u64,
    /// Timeout for management-service HTTP requests, in seconds.
    pub api_timeout_secs: u64,
    /// Timeout for each echo ping, in seconds.
    pub ping_timeout_secs: u64,
    /// Cap on concurrent probes per cycle; unlimited when absent.
    pub max_concurrency: Option<usize>,
    /// Whether to post individual latency samples back to the service.
    pub report_latency: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            interval_secs: 120,
            jitter_secs: 30,
            api_timeout_secs: 5,
            ping_timeout_secs: 2,
            max_concurrency: None,
            report_latency: true,
        }
    }
}

impl AppConfig {
    pub fn get_config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("peerbeat");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.json"))
    }

    pub fn load() -> Self {
        Self::get_config_path()
            .ok()
            .and_then(|path| {
                if path.exists() {
                    fs::read_to_string(&path)
                        .ok()
                        .and_then(|content| serde_json::from_str::<AppConfig>(&content).ok())
                } else {
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::get_config_path()?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Host identity for the echo server and heartbeat payload.
    pub fn hostname(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr, format!("0.0.0.0:{DEFAULT_PORT}"));
        assert_eq!(config.interval(), Duration::from_secs(120));
        assert_eq!(config.ping_timeout(), Duration::from_secs(2));
        assert!(config.max_concurrency.is_none());
        assert!(config.report_latency);
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = AppConfig::default();
        config.name = "alpha".to_string();
        config.max_concurrency = Some(16);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "alpha");
        assert_eq!(parsed.max_concurrency, Some(16));
    }

    #[test]
    fn explicit_name_wins_over_environment() {
        let mut config = AppConfig::default();
        config.name = "alpha".to_string();
        assert_eq!(config.hostname(), "alpha");
    }
}
