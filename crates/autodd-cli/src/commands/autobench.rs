//! Autobench command - benchmark, then copy with the winning block size
//!
//! Optionally installs the boot-time service with the same block size.

use anyhow::{bail, Context, Result};
use console::style;
use serde_json::json;

use super::benchmark::{self, BenchmarkArgs};
use super::copy;
use super::service::{self, ServiceArgs};
use super::GlobalArgs;

/// Arguments for the autobench command
pub struct AutobenchArgs {
    /// Benchmark options; the devices are shared with the copy
    pub benchmark: BenchmarkArgs,
    /// Install the boot-time service with the winning block size afterwards
    pub install_service: bool,
}

/// Execute the autobench command
pub fn execute(args: AutobenchArgs, global: &GlobalArgs) -> Result<()> {
    let json = args.benchmark.json;
    let quiet = global.quiet || json;

    let run = benchmark::sweep(&args.benchmark, global, quiet, "Autobench")?;
    let Some(report) = &run.report else {
        bail!("No benchmark iteration completed; nothing to copy");
    };
    let block_size = report.best.candidate.size_bytes();

    if !quiet {
        for line in benchmark::render_table(report) {
            println!("{line}");
        }
        println!(
            "\n{} Copying with {} blocks",
            style("▶").cyan(),
            style(report.best.candidate).cyan().bold()
        );
    }

    // the destructive prompt was already answered for the whole run
    let record = copy::transfer(
        args.benchmark.source.clone(),
        args.benchmark.destination.clone(),
        block_size,
        global,
        quiet,
        false,
    )?;

    if args.install_service {
        service::execute(
            ServiceArgs {
                source: args.benchmark.source.clone(),
                destination: args.benchmark.destination.clone(),
                block_size: Some(block_size.to_string()),
                start: false,
                no_enable: false,
                dry_run: false,
            },
            &GlobalArgs {
                yes: true,
                ..global.clone()
            },
        )?;
    }

    if json {
        let output = json!({ "benchmark": run, "copy": record });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize results")?
        );
    } else {
        copy::output_human_readable(&record, quiet);
    }
    Ok(())
}
