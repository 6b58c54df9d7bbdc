//! # autodd Core
//!
//! Core library for benchmarking `dd` block sizes and duplicating one block
//! device onto another.
//!
//! ## Modules
//!
//! - `benchmark`: Block size candidates, the timed sweep and winner selection
//! - `cache`: Sync and page cache drop between copies
//! - `copy`: A single `dd` copy and its measured result
//! - `prepare`: Destructive drive preparation (unmount, partition, rebind, format)
//! - `zeroize`: Overwrite the leading and trailing regions of a device
//! - `orchestrator`: The per-iteration state machine tying it together
//! - `error`: Error types and result aliases
//! - `config`: Runtime configuration
//! - `settings`: Persistent user settings from configuration file
//!
//! ## Example
//!
//! ```ignore
//! use autodd_core::{Duplicator, DuplicationConfig};
//! use autodd_detect::SystemDevices;
//! use autodd_platform::Platform;
//!
//! let platform = Platform;
//! let config = DuplicationConfig::new().iterations(3);
//!
//! let mut duplicator = Duplicator::new(&SystemDevices, &platform, &platform, config);
//! let run = duplicator.run_benchmark("/dev/nvme0n1", "/dev/sdb", 1 << 30)?;
//! if let Some(block_size) = run.best_block_size() {
//!     duplicator.run_copy("/dev/nvme0n1", "/dev/sdb", block_size)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod copy;
pub mod error;
pub mod orchestrator;
pub mod prepare;
pub mod settings;
pub mod zeroize;

#[cfg(test)]
mod testing;

pub use benchmark::{
    candidates_from_sizes, default_candidates, format_duration, format_size, format_speed,
    parse_block_sizes, parse_size, select_best, Benchmark, BenchmarkEvent, BenchmarkReport,
    BenchmarkResult, BlockSizeCandidate, CandidateOutcome, DEFAULT_BENCHMARK_SIZE,
    DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};
pub use cache::{flush, FlushOutcome};
pub use config::DuplicationConfig;
pub use copy::{CopyEngine, CopyReport, CopySpec};
pub use error::{Error, Result};
pub use orchestrator::{
    BenchmarkRun, Duplicator, IterationDetail, IterationOutcome, IterationRecord,
    IterationState, RunEvent,
};
pub use prepare::{PrepareOptions, PrepareStep, Preparer};
pub use settings::{
    BenchmarkSettings, DeviceSettings, PrepareSettings, ServiceSettings, Settings, SettingsError,
};
pub use zeroize::{zeroize, ZeroizeReport, DEFAULT_REGION_SIZE};
