//! autodd - benchmark dd block sizes and duplicate a drive onto another
//!
//! Devices are given as `/dev` paths or WWIDs; everything destructive
//! re-resolves the WWID first, so a drive that re-enumerates under a new
//! name is still found.
//!
//! # Usage
//!
//! ```bash
//! # Show block devices and their WWIDs
//! autodd resolve
//!
//! # Find the fastest block size
//! sudo autodd benchmark /dev/nvme0n1 /dev/sdb --iterations 3
//!
//! # Copy the whole source with a given block size
//! sudo autodd copy /dev/nvme0n1 /dev/sdb --block-size 1M
//!
//! # Benchmark, then copy with the winner
//! sudo autodd autobench /dev/nvme0n1 /dev/sdb
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

use commands::GlobalArgs;

/// autodd - benchmark dd block sizes and duplicate a drive onto another
///
/// Interrupting a run leaves the destination partially prepared; run the
/// command again to start over.
#[derive(Parser)]
#[command(name = "autodd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors and JSON
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Skip confirmation prompts (use with caution!)
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE", env = "AUTODD_CONFIG")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device carrying a WWID, or list all devices
    Resolve {
        /// Device path or WWID; omit to list every block device
        device: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Find the fastest dd block size between two devices (DESTRUCTIVE)
    Benchmark {
        #[command(flatten)]
        run: BenchmarkOptions,
    },

    /// Copy the whole source onto the destination (DESTRUCTIVE)
    Copy {
        /// Source device path or WWID
        source: Option<String>,

        /// Destination device path or WWID
        destination: Option<String>,

        /// Block size for dd (e.g., 32K, 1M)
        #[arg(short, long)]
        block_size: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Benchmark, then copy with the fastest block size (DESTRUCTIVE)
    Autobench {
        #[command(flatten)]
        run: BenchmarkOptions,

        /// Also install the boot-time service with the fastest block size
        #[arg(long)]
        install_service: bool,
    },

    /// Install a systemd service that repeats the copy at every boot
    Service {
        /// Source device path or WWID
        source: Option<String>,

        /// Destination device path or WWID
        destination: Option<String>,

        /// Block size for dd (e.g., 32K, 1M)
        #[arg(short, long)]
        block_size: Option<String>,

        /// Start the service right away
        #[arg(long)]
        start: bool,

        /// Do not enable the service at boot
        #[arg(long)]
        no_enable: bool,

        /// Print the script and unit without installing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show or initialize the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct BenchmarkOptions {
    /// Source device path or WWID
    source: Option<String>,

    /// Destination device path or WWID
    destination: Option<String>,

    /// Bytes copied per block size (e.g., 256M, 1G)
    #[arg(short, long)]
    size: Option<String>,

    /// Comma-separated block sizes to test (default: 512 to 64M)
    #[arg(short, long, value_name = "SIZES")]
    block_sizes: Option<String>,

    /// Number of benchmark passes
    #[arg(short = 'n', long)]
    iterations: Option<u32>,

    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

impl From<BenchmarkOptions> for commands::benchmark::BenchmarkArgs {
    fn from(options: BenchmarkOptions) -> Self {
        Self {
            source: options.source,
            destination: options.destination,
            size: options.size,
            block_sizes: options.block_sizes,
            iterations: options.iterations,
            json: options.json,
        }
    }
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        for cause in e.chain().skip(1) {
            eprintln!("  {} {}", style("Caused by:").yellow(), cause);
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Copies cannot be cancelled cleanly; warn before letting Ctrl+C through
    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let quiet = cli.quiet;
    ctrlc::set_handler(move || {
        if flag.swap(true, std::sync::atomic::Ordering::SeqCst) {
            if !quiet {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        if !quiet {
            eprintln!(
                "\n{}",
                style(
                    "Interrupting leaves the destination partially prepared. \
                     Press Ctrl+C again to exit now"
                )
                .yellow()
            );
        }
    })?;

    let global = GlobalArgs {
        yes: cli.yes,
        quiet: cli.quiet,
        config_file: cli.config_file,
    };

    match cli.command {
        Commands::Resolve { device, json } => {
            commands::resolve::execute(device.as_deref(), json, global.quiet)
        }
        Commands::Benchmark { run } => commands::benchmark::execute(run.into(), &global),
        Commands::Copy {
            source,
            destination,
            block_size,
            json,
        } => commands::copy::execute(
            commands::copy::CopyArgs {
                source,
                destination,
                block_size,
                json,
            },
            &global,
        ),
        Commands::Autobench {
            run,
            install_service,
        } => commands::autobench::execute(
            commands::autobench::AutobenchArgs {
                benchmark: run.into(),
                install_service,
            },
            &global,
        ),
        Commands::Service {
            source,
            destination,
            block_size,
            start,
            no_enable,
            dry_run,
        } => commands::service::execute(
            commands::service::ServiceArgs {
                source,
                destination,
                block_size,
                start,
                no_enable,
                dry_run,
            },
            &global,
        ),
        Commands::Config { init, path, json } => {
            commands::config::execute(commands::config::ConfigArgs {
                init,
                path,
                json,
                quiet: global.quiet,
                config_file: global.config_file,
            })
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
