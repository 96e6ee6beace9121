// Configuration management for the RicohSync CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/ricohsync/config.json
// - Linux: ~/.config/ricohsync/config.json
// - Windows: %APPDATA%\ricohsync\config.json

use anyhow::{Context, Result};
use ricohsync_core::{LocationSample, RetryPolicy, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device id (or name fragment) `sync` uses when none is given
    pub default_device: Option<String>,

    /// How long `scan` listens for advertisements
    pub scan_seconds: u64,

    /// Only list devices whose name contains this
    pub name_filter: Option<String>,

    /// Seconds between sync ticks
    pub sync_interval_secs: u64,

    /// Bound on one connection attempt
    pub connect_timeout_secs: u64,

    /// Bound on one characteristic write
    pub write_timeout_secs: u64,

    pub max_connect_attempts: u32,

    pub write_retry_limit: u32,

    /// Position reported on every tick; time-only sync when unset
    pub fixed_location: Option<FixedLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl FixedLocation {
    /// A sample of this position stamped now
    pub fn sample(&self) -> LocationSample {
        let sample = LocationSample::new(chrono::Utc::now(), self.latitude, self.longitude);
        match self.altitude {
            Some(altitude) => sample.with_altitude(altitude),
            None => sample,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            default_device: None,
            scan_seconds: 10,
            name_filter: Some("RICOH".to_string()),
            sync_interval_secs: sync.sync_interval.as_secs(),
            connect_timeout_secs: sync.connect_timeout.as_secs(),
            write_timeout_secs: sync.write_timeout.as_secs(),
            max_connect_attempts: sync.max_connect_attempts,
            write_retry_limit: sync.write_retry_limit,
            fixed_location: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("ricohsync");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    /// Load config from `path`, writing the defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value; an empty value clears optional keys
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "default_device" => self.default_device = optional(value),
            "scan_seconds" => {
                self.scan_seconds = value.parse().context("Invalid number")?;
            }
            "name_filter" => self.name_filter = optional(value),
            "sync_interval_secs" => {
                self.sync_interval_secs = value.parse().context("Invalid number")?;
            }
            "connect_timeout_secs" => {
                self.connect_timeout_secs = value.parse().context("Invalid number")?;
            }
            "write_timeout_secs" => {
                self.write_timeout_secs = value.parse().context("Invalid number")?;
            }
            "max_connect_attempts" => {
                self.max_connect_attempts = value.parse().context("Invalid number")?;
            }
            "write_retry_limit" => {
                self.write_retry_limit = value.parse().context("Invalid number")?;
            }
            "fixed_location" => {
                self.fixed_location = if value.is_empty() {
                    None
                } else {
                    Some(parse_location(value)?)
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        // Reject values the session would refuse before they hit disk
        self.to_sync_config()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "default_device" => self.default_device.clone(),
            "scan_seconds" => Some(self.scan_seconds.to_string()),
            "name_filter" => self.name_filter.clone(),
            "sync_interval_secs" => Some(self.sync_interval_secs.to_string()),
            "connect_timeout_secs" => Some(self.connect_timeout_secs.to_string()),
            "write_timeout_secs" => Some(self.write_timeout_secs.to_string()),
            "max_connect_attempts" => Some(self.max_connect_attempts.to_string()),
            "write_retry_limit" => Some(self.write_retry_limit.to_string()),
            "fixed_location" => self.fixed_location.map(|l| format_location(&l)),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let unset = || "(none)".to_string();
        vec![
            (
                "default_device".to_string(),
                self.default_device.clone().unwrap_or_else(unset),
            ),
            ("scan_seconds".to_string(), format!("{}s", self.scan_seconds)),
            (
                "name_filter".to_string(),
                self.name_filter.clone().unwrap_or_else(unset),
            ),
            (
                "sync_interval_secs".to_string(),
                format!("{}s", self.sync_interval_secs),
            ),
            (
                "connect_timeout_secs".to_string(),
                format!("{}s", self.connect_timeout_secs),
            ),
            (
                "write_timeout_secs".to_string(),
                format!("{}s", self.write_timeout_secs),
            ),
            (
                "max_connect_attempts".to_string(),
                self.max_connect_attempts.to_string(),
            ),
            (
                "write_retry_limit".to_string(),
                self.write_retry_limit.to_string(),
            ),
            (
                "fixed_location".to_string(),
                self.fixed_location
                    .map(|l| format_location(&l))
                    .unwrap_or_else(|| "(time only)".to_string()),
            ),
        ]
    }

    /// Session settings for this config
    pub fn to_sync_config(&self) -> Result<SyncConfig> {
        let config = SyncConfig {
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_connect_attempts: self.max_connect_attempts,
            write_retry_limit: self.write_retry_limit,
            reconnect_backoff: RetryPolicy::default(),
            ..SyncConfig::default()
        };
        config.validate().context("Invalid sync settings")?;
        Ok(config)
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse `lat,lon` or `lat,lon,alt`
pub fn parse_location(value: &str) -> Result<FixedLocation> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() < 2 || parts.len() > 3 {
        anyhow::bail!("Expected <latitude>,<longitude>[,<altitude>], got {:?}", value);
    }

    let location = FixedLocation {
        latitude: parts[0].parse().context("Invalid latitude")?,
        longitude: parts[1].parse().context("Invalid longitude")?,
        altitude: match parts.get(2) {
            Some(altitude) => Some(altitude.parse().context("Invalid altitude")?),
            None => None,
        },
    };
    location
        .sample()
        .validate()
        .context("Location out of range")?;
    Ok(location)
}

fn format_location(location: &FixedLocation) -> String {
    match location.altitude {
        Some(altitude) => format!("{},{},{}", location.latitude, location.longitude, altitude),
        None => format!("{},{}", location.latitude, location.longitude),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.max_connect_attempts, 5);
        assert!(config.fixed_location.is_none());
        assert!(config.to_sync_config().is_ok());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scan_seconds, 10);
    }

    #[test]
    fn test_set_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        config.set("default_device", "GR IIIx").unwrap();
        config.set("sync_interval_secs", "30").unwrap();
        config.set("fixed_location", "35.6586, 139.7454, 40").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.get("default_device").as_deref(), Some("GR IIIx"));
        assert_eq!(reloaded.sync_interval_secs, 30);
        assert_eq!(
            reloaded.fixed_location,
            Some(FixedLocation {
                latitude: 35.6586,
                longitude: 139.7454,
                altitude: Some(40.0),
            })
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "scan_seconds": 3 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.scan_seconds, 3);
        assert_eq!(config.write_retry_limit, 3);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();

        assert!(config.set("nope", "1").is_err());
        assert!(config.set("scan_seconds", "ten").is_err());
        assert!(config.set("fixed_location", "91,0").is_err());
        assert!(config.set("max_connect_attempts", "0").is_err());
    }

    #[test]
    fn test_empty_value_clears_optional_keys() {
        let mut config = Config::default();
        config.set("fixed_location", "1,2").unwrap();
        config.set("fixed_location", "").unwrap();
        config.set("name_filter", "").unwrap();

        assert!(config.get("fixed_location").is_none());
        assert!(config.get("name_filter").is_none());
    }

    #[test]
    fn test_to_sync_config_maps_fields() {
        let config = Config {
            sync_interval_secs: 15,
            write_timeout_secs: 2,
            write_retry_limit: 1,
            ..Default::default()
        };
        let sync = config.to_sync_config().unwrap();

        assert_eq!(sync.sync_interval, Duration::from_secs(15));
        assert_eq!(sync.write_timeout, Duration::from_secs(2));
        assert_eq!(sync.write_retry_limit, 1);
    }
}
