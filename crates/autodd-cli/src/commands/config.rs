//! Configuration file management command

use anyhow::{Context, Result};
use autodd_core::Settings;
use console::style;
use std::path::PathBuf;

/// Arguments for the config command
pub struct ConfigArgs {
    /// Initialize a new configuration file with defaults
    pub init: bool,
    /// Show the path to the configuration file
    pub path: bool,
    /// Show configuration in JSON format
    pub json: bool,
    /// Suppress output (for scripting)
    pub quiet: bool,
    /// Custom configuration file path (overrides default)
    pub config_file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    // Determine the effective config path
    let config_path = args.config_file.clone().or_else(Settings::config_path);

    // Handle --path flag
    if args.path {
        if let Some(path) = &config_path {
            if !args.quiet {
                println!("{}", path.display());
            }
        } else if !args.quiet {
            eprintln!("{}", style("Could not determine config path").yellow());
        }
        return Ok(());
    }

    // Handle --init flag
    if args.init {
        return init_config(config_path, args.quiet);
    }

    // Default: show current configuration
    show_config(config_path, args.json, args.quiet)
}

/// Initialize a new configuration file with default values
fn init_config(config_path: Option<PathBuf>, quiet: bool) -> Result<()> {
    let path = config_path.context("Could not determine configuration directory")?;

    if path.exists() {
        if !quiet {
            eprintln!(
                "{} Configuration file already exists at: {}",
                style("Warning:").yellow(),
                path.display()
            );
            eprintln!("Use a text editor to modify it, or delete it to re-initialize.");
        }
        return Ok(());
    }

    let settings = Settings::default();
    let saved_path = settings
        .save_to_path(Some(path))
        .context("Failed to save configuration file")?;

    if !quiet {
        println!(
            "{} Created configuration file at: {}",
            style("Success:").green(),
            saved_path.display()
        );
        println!();
        println!("You can edit this file to set default devices and benchmark options.");
        println!("Example settings:");
        println!();
        println!("  [devices]");
        println!("  source = \"eui.0025388b91c2a1f0\"   # WWID or /dev path");
        println!("  destination = \"/dev/sdb\"");
        println!();
        println!("  [benchmark]");
        println!("  block_sizes = [\"64K\", \"128K\", \"1M\"]");
        println!("  iterations = 3");
    }

    Ok(())
}

/// Show the current configuration
fn show_config(config_path: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }

    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let settings = Settings::load_from_path(config_path.clone());

    if json {
        // Output as JSON for scripting
        let json_output = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        println!("{json_output}");
        return Ok(());
    }

    println!("{}", style("autodd Configuration").bold());
    println!();

    if let Some(path) = &config_path {
        if config_exists {
            println!("  {} {}", style("Config file:").dim(), path.display());
        } else {
            println!(
                "  {} {} {}",
                style("Config file:").dim(),
                path.display(),
                style("(not found, using defaults)").yellow()
            );
        }
    }
    println!();

    println!("{}", style("[devices]").cyan());
    println!("  source = \"{}\"", settings.devices.source);
    println!("  destination = \"{}\"", settings.devices.destination);
    println!();

    println!("{}", style("[benchmark]").cyan());
    println!("  size = \"{}\"", settings.benchmark.size);
    println!("  block_sizes = {:?}", settings.benchmark.block_sizes);
    println!("  iterations = {}", settings.benchmark.iterations);
    println!("  json = {}", settings.benchmark.json);
    println!();

    println!("{}", style("[prepare]").cyan());
    println!("  fstype = \"{}\"", settings.prepare.fstype);
    println!("  partition_size = \"{}\"", settings.prepare.partition_size);
    println!("  zeroize_region = \"{}\"", settings.prepare.zeroize_region);
    println!("  settle_delay_secs = {}", settings.prepare.settle_delay_secs);
    println!("  settle_attempts = {}", settings.prepare.settle_attempts);
    println!();

    println!("{}", style("[service]").cyan());
    println!("  script_path = \"{}\"", settings.service.script_path);
    println!("  unit_dir = \"{}\"", settings.service.unit_dir);
    println!("  unit_name = \"{}\"", settings.service.unit_name);
    println!("  enable = {}", settings.service.enable);
    println!("  start = {}", settings.service.start);

    if !config_exists {
        println!();
        println!(
            "{}",
            style("Run 'autodd config --init' to create a configuration file.").dim()
        );
    }

    Ok(())
}
