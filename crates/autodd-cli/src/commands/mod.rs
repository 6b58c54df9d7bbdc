//! CLI command implementations

use anyhow::{bail, Context, Result};
use autodd_core::{format_size, DuplicationConfig, Settings};
use autodd_detect::DeviceRef;
use console::style;
use dialoguer::Confirm;
use std::path::PathBuf;

/// Conditionally println based on quiet mode
macro_rules! println_if {
    ($quiet:expr) => {
        if !$quiet {
            println!();
        }
    };
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

pub mod autobench;
pub mod benchmark;
pub mod config;
pub mod copy;
pub mod resolve;
pub mod service;

/// Options shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Skip confirmation prompts
    pub yes: bool,
    /// Only print errors and machine output
    pub quiet: bool,
    /// Custom configuration file path (overrides default)
    pub config_file: Option<PathBuf>,
}

impl GlobalArgs {
    /// Settings from the configured or default file
    pub fn settings(&self) -> Settings {
        Settings::load_from_path(self.config_file.clone().or_else(Settings::config_path))
    }
}

/// Source and destination as given (path or WWID)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePair {
    pub source: String,
    pub destination: String,
}

/// Take devices from the command line, falling back to the settings file
pub fn device_pair(
    source: Option<String>,
    destination: Option<String>,
    settings: &Settings,
) -> Result<DevicePair> {
    let pick = |arg: Option<String>, setting: &str, what: &str| -> Result<String> {
        match arg {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ if !setting.trim().is_empty() => Ok(setting.trim().to_string()),
            _ => bail!(
                "No {what} device given.\n\
                 Pass it on the command line or set devices.{what} in the config file."
            ),
        }
    };

    Ok(DevicePair {
        source: pick(source, &settings.devices.source, "source")?,
        destination: pick(destination, &settings.devices.destination, "destination")?,
    })
}

/// Runtime configuration from settings with command line overrides applied
pub fn build_config(
    settings: &Settings,
    block_sizes: Option<&str>,
    iterations: Option<u32>,
) -> Result<DuplicationConfig> {
    let mut config = settings
        .to_config()
        .context("Invalid settings in config file")?;
    if let Some(sizes) = block_sizes {
        config = config.candidates(autodd_core::parse_block_sizes(sizes)?);
    }
    if let Some(iterations) = iterations {
        config = config.iterations(iterations);
    }
    config.validate()?;
    Ok(config)
}

/// Fail unless running as root
pub fn require_root(command: &str) -> Result<()> {
    if !autodd_platform::has_elevated_privileges() {
        bail!(
            "Root privileges required.\n\
             Try running with: sudo autodd {command} ..."
        );
    }
    Ok(())
}

/// Warning shown before anything destructive
const WARNING_BOX: [&str; 5] = [
    "╔══════════════════════════════════════════════════════════════╗",
    "║                    DESTRUCTIVE OPERATION                     ║",
    "║  The destination is repartitioned, formatted and overwritten ║",
    "║  ALL DATA ON THE DESTINATION WILL BE PERMANENTLY LOST!       ║",
    "╚══════════════════════════════════════════════════════════════╝",
];

/// Ask before wiping the destination
pub fn confirm_destruction(destination: &DeviceRef, size: u64, action: &str) -> Result<bool> {
    println!();
    for line in WARNING_BOX {
        println!("{}", style(line).red().bold());
    }
    println!();

    let prompt = format!(
        "{action} onto {destination} ({})? This WILL DESTROY ALL DATA on this drive",
        format_size(size)
    );

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to get user confirmation")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(source: &str, destination: &str) -> Settings {
        let mut settings = Settings::default();
        settings.devices.source = source.to_string();
        settings.devices.destination = destination.to_string();
        settings
    }

    #[test]
    fn test_device_pair_prefers_arguments() {
        let settings = settings_with("eui.0001", "/dev/sdc");
        let pair = device_pair(
            Some("/dev/nvme0n1".to_string()),
            Some("/dev/sdb".to_string()),
            &settings,
        )
        .unwrap();
        assert_eq!(pair.source, "/dev/nvme0n1");
        assert_eq!(pair.destination, "/dev/sdb");
    }

    #[test]
    fn test_device_pair_falls_back_to_settings() {
        let settings = settings_with("eui.0001", " usb-Flash_0001 ");
        let pair = device_pair(None, None, &settings).unwrap();
        assert_eq!(pair.source, "eui.0001");
        assert_eq!(pair.destination, "usb-Flash_0001");
    }

    #[test]
    fn test_device_pair_missing() {
        let err = device_pair(Some("/dev/nvme0n1".to_string()), None, &Settings::default())
            .unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_build_config_overrides() {
        let config = build_config(&Settings::default(), Some("64K,128K"), Some(3)).unwrap();
        assert_eq!(config.iterations, 3);
        assert_eq!(config.candidates.len(), 2);
        assert_eq!(config.candidates[0].size_bytes(), 65536);
    }

    #[test]
    fn test_build_config_rejects_zero_iterations() {
        assert!(build_config(&Settings::default(), None, Some(0)).is_err());
        assert!(build_config(&Settings::default(), Some("64K,64K"), None).is_err());
    }

    #[test]
    fn test_warning_box_is_rectangular() {
        let width = WARNING_BOX[0].chars().count();
        for line in WARNING_BOX {
            assert_eq!(line.chars().count(), width, "{line}");
        }
    }
}
