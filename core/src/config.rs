use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface used by live capture when the caller names none.
    pub default_interface: Option<String>,
    pub packet_count: usize,
    pub timeout_secs: u64,
    /// Where saved captures are written and served from. Defaults to the
    /// system temp directory.
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enable_geolocation: bool,
    pub geo_endpoint: String,
    pub geo_timeout_ms: u64,
    pub geo_lookup_limit: usize,
    /// Stop caching new locations past this many entries. `None` keeps
    /// every result for the life of the process.
    pub geo_cache_capacity: Option<usize>,
    pub port_scan_threshold: usize,
    pub top_talkers_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_interface: None,
            packet_count: 30,
            timeout_secs: 15,
            staging_dir: None,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable_geolocation: true,
            geo_endpoint: "http://ip-api.com/json".to_string(),
            geo_timeout_ms: 3000,
            geo_lookup_limit: 20,
            geo_cache_capacity: None,
            port_scan_threshold: 5,
            top_talkers_limit: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Like [`Config::from_file`] but never fails: a missing or broken file
    /// yields the defaults, which carry no default interface.
    pub fn load(path: &str) -> Self {
        if !Path::new(path).exists() {
            log::warn!("{} not found. Using default settings.", path);
            return Config::default();
        }

        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Error reading {}: {}. Using default settings.", path, e);
                Config::default()
            }
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.capture
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"capture": {"default_interface": "eth1"}}"#).unwrap();

        assert_eq!(config.capture.default_interface.as_deref(), Some("eth1"));
        assert_eq!(config.capture.packet_count, 30);
        assert_eq!(config.analysis.port_scan_threshold, 5);
        assert_eq!(config.analysis.geo_lookup_limit, 20);
    }

    #[test]
    fn test_load_missing_file_has_no_default_interface() {
        let config = Config::load("/nonexistent/netsift/config.json");
        assert!(config.capture.default_interface.is_none());
    }

    #[test]
    fn test_load_unparsable_file_falls_back() {
        let path = std::env::temp_dir().join(format!("netsift-bad-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ not json").unwrap();

        let config = Config::load(path.to_str().unwrap());
        assert!(config.capture.default_interface.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("netsift-cfg-{}.json", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.capture.default_interface = Some("wlan0".to_string());
        config.to_file(path.to_str().unwrap()).unwrap();

        let loaded = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.capture.default_interface.as_deref(), Some("wlan0"));

        std::fs::remove_file(&path).ok();
    }
}
