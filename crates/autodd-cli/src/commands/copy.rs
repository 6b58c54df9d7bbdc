//! Copy command - duplicates the whole source onto the destination
//!
//! **Warning:** This is a destructive operation that will overwrite data on the destination.

use anyhow::{bail, Context, Result};
use console::style;

use autodd_core::{
    format_duration, format_size, format_speed, Duplicator, IterationDetail, IterationOutcome,
    IterationRecord, DEFAULT_BLOCK_SIZE,
};
use autodd_detect::SystemDevices;
use autodd_platform::{DiskOps, Platform};

use super::{build_config, confirm_destruction, device_pair, require_root, GlobalArgs};
use crate::progress::RunProgress;

/// Arguments for the copy command
pub struct CopyArgs {
    /// Source device (path or WWID)
    pub source: Option<String>,
    /// Destination device (path or WWID)
    pub destination: Option<String>,
    /// Block size (e.g., "32K", "4M")
    pub block_size: Option<String>,
    /// Output in JSON format
    pub json: bool,
}

/// Execute the copy command
pub fn execute(args: CopyArgs, global: &GlobalArgs) -> Result<()> {
    let block_size = match &args.block_size {
        Some(size) => autodd_core::parse_size(size)?,
        None => DEFAULT_BLOCK_SIZE,
    };
    let quiet = global.quiet || args.json;

    let record = transfer(
        args.source,
        args.destination,
        block_size,
        global,
        quiet,
        !global.yes,
    )?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialize result")?
        );
    } else {
        output_human_readable(&record, quiet);
    }
    Ok(())
}

/// Run a production copy; shared with `autobench`
pub fn transfer(
    source: Option<String>,
    destination: Option<String>,
    block_size: u64,
    global: &GlobalArgs,
    quiet: bool,
    confirm: bool,
) -> Result<IterationRecord> {
    let settings = global.settings();
    let devices = device_pair(source, destination, &settings)?;
    let config = build_config(&settings, None, None)?;

    require_root("copy")?;

    let platform = Platform;
    let progress = RunProgress::new(1, quiet);
    let mut duplicator = Duplicator::new(&SystemDevices, &platform, &platform, config)
        .on_event(|event| progress.handle(event));

    let source = duplicator
        .capture(&devices.source)
        .context("Failed to identify source device")?;
    let destination = duplicator
        .capture(&devices.destination)
        .context("Failed to identify destination device")?;
    let source_size = platform
        .device_size(&source.path)
        .context("Failed to read source size")?;

    println_if!(quiet);
    println_if!(
        quiet,
        "{} {} -> {}",
        style("Copy:").bold(),
        style(&source).cyan(),
        style(&destination).cyan()
    );
    println_if!(quiet, "  Source size: {}", format_size(source_size));
    println_if!(quiet, "  Block size: {}", format_size(block_size));

    if confirm {
        let destination_size = platform
            .device_size(&destination.path)
            .context("Failed to read destination size")?;
        if !confirm_destruction(&destination, destination_size, "Copy")? {
            bail!("Aborted by user");
        }
    }

    println_if!(quiet, "\n{} Copying...", style("▶").cyan());
    let result = duplicator.run_copy(&source.wwid, &destination.wwid, block_size);
    progress.finish();

    result.context("Copy failed")
}

/// Output the result in human-readable format
pub fn output_human_readable(record: &IterationRecord, quiet: bool) {
    if let IterationOutcome::Success(IterationDetail::Copy(report)) = &record.outcome {
        println_if!(quiet);
        println_if!(quiet, "{}", style("Results:").bold().green());
        println_if!(
            quiet,
            "  Copied:      {}",
            format_size(report.transferred_bytes)
        );
        println_if!(quiet, "  Destination: {}", record.target.partition_path());
        println_if!(
            quiet,
            "  Speed:       {}",
            style(format_speed(report.throughput())).cyan().bold()
        );
        println_if!(quiet, "  Total Time:  {}", format_duration(report.elapsed));
        println_if!(quiet);
        println_if!(quiet, "{} Copy complete!", style("✓").green().bold());
    }
}
