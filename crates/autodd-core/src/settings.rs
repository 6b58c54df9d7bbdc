//! Persistent user settings for autodd
//!
//! Settings are stored in a TOML configuration file at
//! `~/.config/autodd/autodd_config.toml` (or the platform equivalent).
//!
//! # Example Configuration
//!
//! ```toml
//! [devices]
//! source = "eui.0025388b71b2a1c3"
//! destination = "/dev/sdb"
//!
//! [benchmark]
//! size = "1G"
//! block_sizes = ["64K", "128K", "1M"]
//! iterations = 1
//! json = false
//!
//! [prepare]
//! fstype = "ext4"
//! partition_size = ""
//! zeroize_region = "1M"
//! settle_delay_secs = 3
//! settle_attempts = 5
//!
//! [service]
//! script_path = "/usr/local/bin/run_autodd.sh"
//! unit_dir = "/etc/systemd/system"
//! unit_name = "autodd.service"
//! enable = true
//! start = false
//! ```

use crate::benchmark::{candidates_from_sizes, parse_size, DEFAULT_BENCHMARK_SIZE};
use crate::config::DuplicationConfig;
use crate::error::Result;
use crate::prepare::{DEFAULT_FSTYPE, DEFAULT_SETTLE_ATTEMPTS, DEFAULT_SETTLE_DELAY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "autodd_config.toml";

/// Application name for config directory
const APP_NAME: &str = "autodd";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Default devices
    pub devices: DeviceSettings,

    /// Benchmark settings
    pub benchmark: BenchmarkSettings,

    /// Drive preparation settings
    pub prepare: PrepareSettings,

    /// Boot-time service settings
    pub service: ServiceSettings,
}

/// Devices used when none are given on the command line
///
/// Each entry is a WWID or a device path; empty means unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceSettings {
    /// Copy source
    pub source: String,

    /// Copy destination
    pub destination: String,
}

/// Settings for benchmark operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BenchmarkSettings {
    /// Bytes copied per candidate (e.g., "512M", "1G")
    pub size: String,

    /// Candidate block sizes; empty means the default 512 B to 64 MB sweep
    pub block_sizes: Vec<String>,

    /// Benchmark passes
    pub iterations: u32,

    /// Output results in JSON format by default
    pub json: bool,
}

/// Settings for drive preparation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrepareSettings {
    /// Filesystem type for the new partition
    pub fstype: String,

    /// Fixed partition size; empty sizes the partition to the transfer
    pub partition_size: String,

    /// Bytes zeroed at each end of the destination
    pub zeroize_region: String,

    /// Seconds to wait before each re-resolution after a rebind
    pub settle_delay_secs: u64,

    /// Re-resolution attempts after a rebind
    pub settle_attempts: u32,
}

/// Settings for the boot-time copy service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceSettings {
    /// Where the copy script is written
    pub script_path: String,

    /// Directory holding systemd unit files
    pub unit_dir: String,

    /// Unit file name
    pub unit_name: String,

    /// Enable the unit at boot after installing it
    pub enable: bool,

    /// Start the unit immediately after installing it
    pub start: bool,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            size: "1G".to_string(),
            block_sizes: Vec::new(),
            iterations: 1,
            json: false,
        }
    }
}

impl Default for PrepareSettings {
    fn default() -> Self {
        Self {
            fstype: DEFAULT_FSTYPE.to_string(),
            partition_size: String::new(),
            zeroize_region: "1M".to_string(),
            settle_delay_secs: DEFAULT_SETTLE_DELAY.as_secs(),
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            script_path: "/usr/local/bin/run_autodd.sh".to_string(),
            unit_dir: "/etc/systemd/system".to_string(),
            unit_name: "autodd.service".to_string(),
            enable: true,
            start: false,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    #[must_use]
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    #[must_use]
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save settings to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if there is no config directory or the file cannot be written.
    pub fn save(&self) -> std::result::Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is `None` or the file cannot be written.
    pub fn save_to_path(&self, path: Option<PathBuf>) -> std::result::Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    #[must_use]
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Generate a default configuration file content as a string
    #[must_use]
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }

    /// Benchmark size in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the size string is malformed.
    pub fn benchmark_size(&self) -> Result<u64> {
        if self.benchmark.size.trim().is_empty() {
            return Ok(DEFAULT_BENCHMARK_SIZE);
        }
        parse_size(&self.benchmark.size)
    }

    /// Runtime configuration described by these settings
    ///
    /// # Errors
    ///
    /// Returns an error if a size is malformed or the block size list is invalid.
    pub fn to_config(&self) -> Result<DuplicationConfig> {
        let mut config = DuplicationConfig::new()
            .iterations(self.benchmark.iterations)
            .fstype(self.prepare.fstype.clone())
            .zeroize_region(parse_size(&self.prepare.zeroize_region)?)
            .settle_delay(Duration::from_secs(self.prepare.settle_delay_secs))
            .settle_attempts(self.prepare.settle_attempts);

        if !self.benchmark.block_sizes.is_empty() {
            let sizes = self
                .benchmark
                .block_sizes
                .iter()
                .map(|s| parse_size(s))
                .collect::<Result<Vec<u64>>>()?;
            config = config.candidates(candidates_from_sizes(&sizes)?);
        }

        if !self.prepare.partition_size.trim().is_empty() {
            config = config.partition_size(Some(parse_size(&self.prepare.partition_size)?));
        }

        Ok(config)
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.devices.source.is_empty());
        assert!(settings.devices.destination.is_empty());
        assert_eq!(settings.benchmark.size, "1G");
        assert!(settings.benchmark.block_sizes.is_empty());
        assert_eq!(settings.benchmark.iterations, 1);
        assert!(!settings.benchmark.json);
        assert_eq!(settings.prepare.fstype, "ext4");
        assert_eq!(settings.prepare.zeroize_region, "1M");
        assert_eq!(settings.prepare.settle_delay_secs, 3);
        assert_eq!(settings.prepare.settle_attempts, 5);
        assert_eq!(settings.service.script_path, "/usr/local/bin/run_autodd.sh");
        assert_eq!(settings.service.unit_name, "autodd.service");
        assert!(settings.service.enable);
        assert!(!settings.service.start);
    }

    #[test]
    fn test_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("autodd_config.toml");

        let settings = Settings {
            devices: DeviceSettings {
                source: "eui.0025388b71b2a1c3".to_string(),
                destination: "/dev/sdb".to_string(),
            },
            benchmark: BenchmarkSettings {
                size: "512M".to_string(),
                block_sizes: vec!["64K".to_string(), "1M".to_string()],
                iterations: 3,
                json: true,
            },
            prepare: PrepareSettings {
                fstype: "xfs".to_string(),
                partition_size: "8G".to_string(),
                zeroize_region: "512K".to_string(),
                settle_delay_secs: 1,
                settle_attempts: 10,
            },
            service: ServiceSettings {
                start: true,
                ..ServiceSettings::default()
            },
        };

        settings.save_to_path(Some(config_path.clone())).unwrap();
        assert!(config_path.exists());

        let loaded = Settings::load_from_path(Some(config_path));
        assert_eq!(settings, loaded);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let settings =
            Settings::load_from_path(Some(PathBuf::from("/nonexistent/autodd_config.toml")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_no_path() {
        assert_eq!(Settings::load_from_path(None), Settings::default());
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("autodd_config.toml");

        let partial_config = r#"
[benchmark]
iterations = 4
"#;
        std::fs::write(&config_path, partial_config).unwrap();

        let settings = Settings::load_from_path(Some(config_path));
        assert_eq!(settings.benchmark.iterations, 4);
        assert_eq!(settings.benchmark.size, "1G");
        assert_eq!(settings.prepare.fstype, "ext4");
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("autodd_config.toml");
        std::fs::write(&config_path, "this is not valid toml {{{{").unwrap();

        let settings = Settings::load_from_path(Some(config_path));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_default_config_string() {
        let config_str = Settings::default_config_string();
        assert!(config_str.contains("[devices]"));
        assert!(config_str.contains("[benchmark]"));
        assert!(config_str.contains("[prepare]"));
        assert!(config_str.contains("[service]"));
        assert!(config_str.contains("settle_attempts"));
    }

    #[test]
    fn test_config_path() {
        if let Some(p) = Settings::config_path() {
            assert!(p.to_string_lossy().contains("autodd"));
            assert!(p.to_string_lossy().ends_with("autodd_config.toml"));
        }
        if let Some(d) = Settings::config_dir() {
            assert!(!d.to_string_lossy().contains("autodd_config.toml"));
        }
    }

    #[test]
    fn test_save_to_none_path() {
        let result = Settings::default().save_to_path(None);
        assert!(matches!(result, Err(SettingsError::NoConfigDir)));
    }

    #[test]
    fn test_to_config_defaults() {
        let settings = Settings::default();
        let config = settings.to_config().unwrap();
        assert_eq!(config, DuplicationConfig::default());
        assert_eq!(settings.benchmark_size().unwrap(), 1 << 30);
    }

    #[test]
    fn test_to_config_overrides() {
        let mut settings = Settings::default();
        settings.benchmark.block_sizes = vec!["64K".to_string(), "128K".to_string()];
        settings.benchmark.iterations = 2;
        settings.prepare.partition_size = "2G".to_string();
        settings.prepare.settle_delay_secs = 0;

        let config = settings.to_config().unwrap();
        assert_eq!(config.candidates.len(), 2);
        assert_eq!(config.iterations, 2);
        assert_eq!(config.partition_size, Some(2 << 30));
        assert_eq!(config.settle_delay, Duration::ZERO);
    }

    #[test]
    fn test_to_config_rejects_bad_sizes() {
        let mut settings = Settings::default();
        settings.benchmark.block_sizes = vec!["64K".to_string(), "64K".to_string()];
        assert!(settings.to_config().is_err());

        let mut settings = Settings::default();
        settings.prepare.zeroize_region = "lots".to_string();
        assert!(settings.to_config().is_err());

        let mut settings = Settings::default();
        settings.benchmark.size = "1Q".to_string();
        assert!(settings.benchmark_size().is_err());
    }

    #[test]
    fn test_settings_error_display() {
        let err = SettingsError::NoConfigDir;
        assert!(err.to_string().contains("configuration directory"));

        let io_err = SettingsError::Io {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(io_err.to_string().contains("/test/path"));
    }
}
