//! Benchmark command - finds the fastest dd block size for a device pair
//!
//! Every iteration repartitions and formats the destination, then copies the
//! same amount of data from the source once per candidate block size.
//!
//! **Warning:** This is a destructive operation that will overwrite data on the destination.

use anyhow::{bail, Context, Result};
use console::style;

use autodd_core::{
    format_size, format_speed, BenchmarkReport, BenchmarkRun, CandidateOutcome, Duplicator,
    IterationOutcome,
};
use autodd_detect::SystemDevices;
use autodd_platform::{DiskOps, Platform};

use super::{build_config, confirm_destruction, device_pair, require_root, GlobalArgs};
use crate::progress::RunProgress;

/// Arguments for the benchmark command
pub struct BenchmarkArgs {
    /// Source device (path or WWID)
    pub source: Option<String>,
    /// Destination device (path or WWID)
    pub destination: Option<String>,
    /// Bytes copied per candidate (e.g., "256M", "1G")
    pub size: Option<String>,
    /// Comma-separated candidate block sizes
    pub block_sizes: Option<String>,
    /// Benchmark passes
    pub iterations: Option<u32>,
    /// Output in JSON format
    pub json: bool,
}

/// Execute the benchmark command
pub fn execute(args: BenchmarkArgs, global: &GlobalArgs) -> Result<()> {
    let json = args.json || global.settings().benchmark.json;
    let quiet = global.quiet || json;
    let run = sweep(&args, global, quiet, "Benchmark")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialize results")?
        );
    } else {
        output_human_readable(&run, quiet);
    }

    if run.report.is_none() {
        bail!("No benchmark iteration completed; see the log above for the failing step");
    }
    Ok(())
}

/// Run the benchmark part shared with `autobench`
pub fn sweep(
    args: &BenchmarkArgs,
    global: &GlobalArgs,
    quiet: bool,
    action: &str,
) -> Result<BenchmarkRun> {
    let settings = global.settings();
    let devices = device_pair(args.source.clone(), args.destination.clone(), &settings)?;
    let config = build_config(&settings, args.block_sizes.as_deref(), args.iterations)?;
    let size = match &args.size {
        Some(size) => autodd_core::parse_size(size)?,
        None => settings.benchmark_size()?,
    };

    require_root(&action.to_lowercase())?;

    let platform = Platform;
    let progress = RunProgress::new(config.iterations, quiet);
    let iterations = config.iterations;
    let candidates: Vec<String> = config.candidates.iter().map(ToString::to_string).collect();

    let mut duplicator = Duplicator::new(&SystemDevices, &platform, &platform, config)
        .on_event(|event| progress.handle(event));

    let source = duplicator
        .capture(&devices.source)
        .context("Failed to identify source device")?;
    let destination = duplicator
        .capture(&devices.destination)
        .context("Failed to identify destination device")?;

    println_if!(quiet);
    println_if!(
        quiet,
        "{} {} -> {}",
        style(format!("{action}:")).bold(),
        style(&source).cyan(),
        style(&destination).cyan()
    );
    println_if!(quiet, "  Size per candidate: {}", format_size(size));
    println_if!(quiet, "  Block sizes: {}", candidates.join(", "));
    println_if!(quiet, "  Iterations: {}", iterations);

    let destination_size = platform
        .device_size(&destination.path)
        .context("Failed to read destination size")?;
    if !global.yes && !confirm_destruction(&destination, destination_size, action)? {
        bail!("Aborted by user");
    }

    println_if!(quiet, "\n{} Benchmarking...", style("▶").cyan());
    let result = duplicator.run_benchmark(&source.wwid, &destination.wwid, size);
    progress.finish();

    result.context("Benchmark failed")
}

/// Candidate table for one report, marking the selected block size
pub fn render_table(report: &BenchmarkReport) -> Vec<String> {
    let mut lines = vec![
        "  ┌──────────────┬────────────────┬────────────┐".to_string(),
        "  │ Block Size   │ Speed          │ Time       │".to_string(),
        "  ├──────────────┼────────────────┼────────────┤".to_string(),
    ];

    for outcome in &report.outcomes {
        let candidate = outcome.candidate();
        let (speed, time) = match outcome {
            CandidateOutcome::Measured(r) => (
                format_speed(r.throughput_bytes_per_sec),
                format!("{:.2}s", r.elapsed_seconds),
            ),
            CandidateOutcome::Failed { .. } => ("failed".to_string(), "-".to_string()),
            CandidateOutcome::Skipped { .. } => ("skipped".to_string(), "-".to_string()),
        };
        let marker = if candidate == report.best.candidate {
            " ← Best"
        } else {
            ""
        };
        lines.push(format!(
            "  │ {:12} │ {:14} │ {:10} │{}",
            candidate.to_string(),
            speed,
            time,
            marker
        ));
    }

    lines.push("  └──────────────┴────────────────┴────────────┘".to_string());
    lines
}

/// Output results in human-readable format
fn output_human_readable(run: &BenchmarkRun, quiet: bool) {
    for record in &run.records {
        if let IterationOutcome::Failure { state, reason } = &record.outcome {
            println_if!(
                quiet,
                "  {} Iteration {} failed at {}: {}",
                style("✗").red(),
                record.index,
                state,
                reason
            );
        }
    }

    let Some(report) = &run.report else {
        return;
    };

    println_if!(quiet);
    println_if!(
        quiet,
        "{}",
        style("Block Size Performance Comparison:").bold().green()
    );
    for line in render_table(report) {
        println_if!(quiet, "{}", line);
    }
    if report.runs > 1 {
        println_if!(
            quiet,
            "  Times are totals over {} runs of {} each",
            report.runs,
            format_size(report.benchmark_size)
        );
    }

    println_if!(quiet);
    println_if!(
        quiet,
        "{} Use {} block size ({})",
        style("Recommendation:").bold(),
        style(report.best.candidate).cyan().bold(),
        format_speed(report.best.throughput_bytes_per_sec)
    );
    println_if!(quiet);
    println_if!(quiet, "{} Benchmark complete!", style("✓").green().bold());
}
