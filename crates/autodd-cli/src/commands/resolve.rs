//! Resolve command - shows which device node carries a WWID
//!
//! Without an argument, lists every whole-disk block device with its WWID.

use anyhow::{Context, Result};
use console::style;
use humansize::{format_size, BINARY};

use autodd_detect::{BlockDevice, BlockDeviceSource, DeviceResolver, SystemDevices};

/// Execute the resolve command
pub fn execute(device: Option<&str>, json: bool, quiet: bool) -> Result<()> {
    match device {
        Some(device) => resolve_one(&SystemDevices, device, json, quiet),
        None => list_all(&SystemDevices, json, quiet),
    }
}

fn resolve_one(source: &dyn BlockDeviceSource, device: &str, json: bool, quiet: bool) -> Result<()> {
    let resolver = DeviceResolver::new(source);
    let resolved = if device.starts_with('/') {
        resolver.capture(device)
    } else {
        resolver.resolve(device)
    }
    .with_context(|| format!("Failed to resolve {device}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else if !quiet {
        println!(
            "{} {}",
            style(&resolved.path).white().bold(),
            style(format!("WWID {}", resolved.wwid)).dim()
        );
        println!("    Partition: {}", resolved.partition_path());
    }
    Ok(())
}

fn list_all(source: &dyn BlockDeviceSource, json: bool, quiet: bool) -> Result<()> {
    let devices = source
        .block_devices()
        .context("Failed to list block devices")?;

    // JSON output mode - always output even in quiet mode (it's machine-readable)
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if quiet {
        return Ok(());
    }

    if devices.is_empty() {
        println!("No block devices found.");
        return Ok(());
    }

    println!(
        "{} {} device(s):\n",
        style("Found").green().bold(),
        devices.len()
    );
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

/// Print a single device's information
fn print_device(device: &BlockDevice) {
    let status = if device.wwid.is_some() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };

    let removable = if device.removable {
        style("removable").cyan()
    } else {
        style("internal").yellow()
    };

    println!(
        "{} {} ({}, {}, {})",
        status,
        style(&device.path).white().bold(),
        format_size(device.size, BINARY),
        device.drive_type,
        removable
    );

    match &device.wwid {
        Some(wwid) => println!("    WWID: {}", style(wwid).dim()),
        None => println!(
            "    WWID: {}",
            style("none (cannot be used as source or destination)").yellow()
        ),
    }
    println!();
}
