//! Block size benchmarking
//!
//! Copies the same number of bytes from source to destination once per
//! candidate block size, starting each run from a flushed cache, and picks
//! the block size with the highest measured throughput.

use crate::cache;
use crate::copy::{CopyEngine, CopySpec};
use crate::error::{Error, Result};
use autodd_platform::DiskOps;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Smallest block size in the default sweep (512 B)
pub const MIN_BLOCK_SIZE: u64 = 512;

/// Largest block size in the default sweep (64 MB)
pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Block size suggested when no benchmark has been run (32 KB)
pub const DEFAULT_BLOCK_SIZE: u64 = 32 * 1024;

/// Default bytes copied per candidate (1 GB)
pub const DEFAULT_BENCHMARK_SIZE: u64 = 1024 * 1024 * 1024;

/// A block size to measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockSizeCandidate {
    /// Block size in bytes, always greater than zero
    size_bytes: u64,
}

impl BlockSizeCandidate {
    /// Create a candidate
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero size.
    pub fn new(size_bytes: u64) -> Result<Self> {
        if size_bytes == 0 {
            return Err(Error::InvalidConfig(
                "block size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { size_bytes })
    }

    /// Block size in bytes
    #[must_use]
    pub const fn size_bytes(self) -> u64 {
        self.size_bytes
    }
}

impl fmt::Display for BlockSizeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_size(self.size_bytes))
    }
}

/// The default sweep: every power of two from 512 B to 64 MB
#[must_use]
pub fn default_candidates() -> Vec<BlockSizeCandidate> {
    std::iter::successors(Some(MIN_BLOCK_SIZE), |s| Some(s * 2))
        .take_while(|s| *s <= MAX_BLOCK_SIZE)
        .map(|size_bytes| BlockSizeCandidate { size_bytes })
        .collect()
}

/// Build a candidate set from explicit sizes
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for an empty list, a zero size, or a
/// size listed twice.
pub fn candidates_from_sizes(sizes: &[u64]) -> Result<Vec<BlockSizeCandidate>> {
    if sizes.is_empty() {
        return Err(Error::InvalidConfig(
            "at least one block size is required".to_string(),
        ));
    }

    let mut candidates = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let candidate = BlockSizeCandidate::new(size)?;
        if candidates.contains(&candidate) {
            return Err(Error::InvalidConfig(format!(
                "block size {} listed more than once",
                format_size(size)
            )));
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// One measured candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BenchmarkResult {
    /// Block size measured
    pub candidate: BlockSizeCandidate,

    /// Wall-clock seconds including the final sync
    ///
    /// In a combined report this is the sum over every run that measured
    /// the candidate.
    pub elapsed_seconds: f64,

    /// `transferred_bytes / elapsed_seconds`
    pub throughput_bytes_per_sec: f64,

    /// Bytes copied (`block_count * block size`)
    ///
    /// Summed like `elapsed_seconds` in a combined report, so throughput stays
    /// comparable between candidates measured in a different number of runs.
    pub transferred_bytes: u64,
}

impl BenchmarkResult {
    /// Build a result; `None` if no positive, finite time was measured
    #[must_use]
    pub fn new(candidate: BlockSizeCandidate, transferred_bytes: u64, elapsed_seconds: f64) -> Option<Self> {
        if !(elapsed_seconds.is_finite() && elapsed_seconds > 0.0) {
            return None;
        }
        Some(Self {
            candidate,
            elapsed_seconds,
            throughput_bytes_per_sec: transferred_bytes as f64 / elapsed_seconds,
            transferred_bytes,
        })
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CandidateOutcome {
    /// The copy completed and was timed
    Measured(BenchmarkResult),

    /// The copy failed
    Failed {
        /// Block size attempted
        candidate: BlockSizeCandidate,
        /// Why it failed
        reason: String,
    },

    /// The candidate could not run with this benchmark size
    Skipped {
        /// Block size skipped
        candidate: BlockSizeCandidate,
        /// Why it was skipped
        reason: String,
    },
}

impl CandidateOutcome {
    /// The candidate this outcome belongs to
    #[must_use]
    pub const fn candidate(&self) -> BlockSizeCandidate {
        match self {
            Self::Measured(r) => r.candidate,
            Self::Failed { candidate, .. } | Self::Skipped { candidate, .. } => *candidate,
        }
    }

    /// The measurement, if there is one
    #[must_use]
    pub const fn measured(&self) -> Option<&BenchmarkResult> {
        match self {
            Self::Measured(r) => Some(r),
            _ => None,
        }
    }
}

/// Progress notification while a benchmark runs
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkEvent {
    /// A candidate is about to be copied
    Started {
        /// Zero-based position in the candidate list
        index: usize,
        /// Number of candidates
        total: usize,
        /// Block size about to run
        candidate: BlockSizeCandidate,
    },

    /// A candidate finished, failed or was skipped
    Finished {
        /// Zero-based position in the candidate list
        index: usize,
        /// Number of candidates
        total: usize,
        /// What happened
        outcome: CandidateOutcome,
    },
}

/// All candidate outcomes of a benchmark and the winner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    /// Benchmark destination
    pub destination: String,

    /// Bytes requested per candidate in each run
    pub benchmark_size: u64,

    /// Number of benchmark runs merged into this report
    pub runs: usize,

    /// One outcome per candidate, in candidate order
    pub outcomes: Vec<CandidateOutcome>,

    /// The selected candidate
    pub best: BenchmarkResult,
}

impl BenchmarkReport {
    /// Build a report and select the winner
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllCandidatesFailed`] if nothing was measured.
    pub fn from_outcomes(
        destination: impl Into<String>,
        benchmark_size: u64,
        outcomes: Vec<CandidateOutcome>,
    ) -> Result<Self> {
        let destination = destination.into();
        let measured: Vec<BenchmarkResult> = outcomes
            .iter()
            .filter_map(CandidateOutcome::measured)
            .copied()
            .collect();

        let best = select_best(&measured)
            .copied()
            .ok_or_else(|| Error::AllCandidatesFailed {
                destination: destination.clone(),
                attempted: outcomes.len(),
            })?;

        Ok(Self {
            destination,
            benchmark_size,
            runs: 1,
            outcomes,
            best,
        })
    }

    /// Merge reports of repeated runs over the same candidates
    ///
    /// Each candidate's bytes and seconds are summed across runs, so its
    /// throughput is the aggregate over every successful run. A candidate never
    /// measured keeps its latest failure or skip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllCandidatesFailed`] if no run measured anything, and
    /// [`Error::InvalidConfig`] if `reports` is empty.
    pub fn combine(reports: &[Self]) -> Result<Self> {
        let first = reports
            .first()
            .ok_or_else(|| Error::InvalidConfig("no benchmark reports to combine".to_string()))?;

        let mut outcomes = Vec::with_capacity(first.outcomes.len());
        for outcome in &first.outcomes {
            let candidate = outcome.candidate();
            let runs: Vec<&CandidateOutcome> = reports
                .iter()
                .filter_map(|r| r.outcomes.iter().find(|o| o.candidate() == candidate))
                .collect();

            let (bytes, secs) = runs
                .iter()
                .filter_map(|o| o.measured())
                .fold((0u64, 0.0f64), |(b, s), r| {
                    (b + r.transferred_bytes, s + r.elapsed_seconds)
                });

            let merged = BenchmarkResult::new(candidate, bytes, secs)
                .map(CandidateOutcome::Measured)
                .or_else(|| runs.last().map(|o| (*o).clone()))
                .unwrap_or_else(|| outcome.clone());
            outcomes.push(merged);
        }

        let mut combined =
            Self::from_outcomes(first.destination.clone(), first.benchmark_size, outcomes)?;
        combined.runs = reports.len();
        Ok(combined)
    }

    /// Measured candidates only
    pub fn measured(&self) -> impl Iterator<Item = &BenchmarkResult> {
        self.outcomes.iter().filter_map(CandidateOutcome::measured)
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Pick the highest throughput; equal throughput goes to the larger block size
#[must_use]
pub fn select_best(results: &[BenchmarkResult]) -> Option<&BenchmarkResult> {
    results.iter().max_by(|a, b| {
        a.throughput_bytes_per_sec
            .total_cmp(&b.throughput_bytes_per_sec)
            .then(a.candidate.cmp(&b.candidate))
    })
}

/// Runs a candidate sweep between two devices
pub struct Benchmark<'a> {
    disk: &'a dyn DiskOps,
    engine: CopyEngine<'a>,
}

impl<'a> Benchmark<'a> {
    /// Create a benchmark over the given disk operations and copy engine
    pub fn new(disk: &'a dyn DiskOps, engine: CopyEngine<'a>) -> Self {
        Self { disk, engine }
    }

    /// Measure every candidate copying `benchmark_size` bytes
    ///
    /// A candidate larger than `benchmark_size` is skipped. A failed copy is
    /// recorded and the sweep continues.
    ///
    /// # Errors
    ///
    /// - [`Error::CacheFlushFailed`] if a sync before a candidate fails
    /// - [`Error::AllCandidatesFailed`] if no candidate was measured
    /// - [`Error::InvalidConfig`] for a zero size or no candidates
    pub fn run(
        &self,
        source: &str,
        destination: &str,
        benchmark_size: u64,
        candidates: &[BlockSizeCandidate],
        observer: &mut dyn FnMut(&BenchmarkEvent),
    ) -> Result<BenchmarkReport> {
        if benchmark_size == 0 {
            return Err(Error::InvalidConfig(
                "benchmark size must be greater than zero".to_string(),
            ));
        }
        if candidates.is_empty() {
            return Err(Error::InvalidConfig(
                "no block size candidates to benchmark".to_string(),
            ));
        }

        tracing::info!(
            "Benchmarking {} candidates, {} each, {} -> {}",
            candidates.len(),
            format_size(benchmark_size),
            source,
            destination
        );

        let total = candidates.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, &candidate) in candidates.iter().enumerate() {
            observer(&BenchmarkEvent::Started {
                index,
                total,
                candidate,
            });

            let outcome = self.run_candidate(source, destination, benchmark_size, candidate)?;
            observer(&BenchmarkEvent::Finished {
                index,
                total,
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);
        }

        let report = BenchmarkReport::from_outcomes(destination, benchmark_size, outcomes)?;
        tracing::info!(
            "Best block size: {} at {}",
            report.best.candidate,
            format_speed(report.best.throughput_bytes_per_sec)
        );
        Ok(report)
    }

    fn run_candidate(
        &self,
        source: &str,
        destination: &str,
        benchmark_size: u64,
        candidate: BlockSizeCandidate,
    ) -> Result<CandidateOutcome> {
        let block_count = benchmark_size / candidate.size_bytes();
        if block_count == 0 {
            tracing::debug!("Skipping {}: larger than benchmark size", candidate);
            return Ok(CandidateOutcome::Skipped {
                candidate,
                reason: format!("larger than benchmark size {}", format_size(benchmark_size)),
            });
        }

        cache::flush(self.disk)?;

        let spec = CopySpec::new(source, destination, candidate.size_bytes(), Some(block_count));

        let outcome = match self.engine.copy(&spec) {
            Ok(report) => BenchmarkResult::new(
                candidate,
                report.transferred_bytes,
                report.elapsed.as_secs_f64(),
            )
            .map_or_else(
                || CandidateOutcome::Failed {
                    candidate,
                    reason: "no elapsed time measured".to_string(),
                },
                CandidateOutcome::Measured,
            ),
            Err(e) => {
                tracing::warn!("Block size {} failed: {}", candidate, e);
                CandidateOutcome::Failed {
                    candidate,
                    reason: e.to_string(),
                }
            }
        };

        if let Some(result) = outcome.measured() {
            tracing::info!(
                "{:>8}: {} in {:.2}s ({})",
                candidate,
                format_size(result.transferred_bytes),
                result.elapsed_seconds,
                format_speed(result.throughput_bytes_per_sec)
            );
        }
        Ok(outcome)
    }
}

// Helper functions

/// Parse a size string like "512", "32K", "1G" or "1.5G" into bytes
///
/// Suffixes are binary (K = 1024) and case-insensitive; `B`, `KB`, `KiB` and
/// friends are accepted.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for an empty, malformed or overflowing size.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let invalid = || Error::InvalidConfig(format!("invalid size: {s:?}"));
    if s.is_empty() {
        return Err(invalid());
    }

    let split_pos = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(split_pos);

    let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return Err(invalid()),
    };

    let num_str = num_str.trim();
    if let Ok(whole) = num_str.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }

    let fractional: f64 = num_str.parse().map_err(|_| invalid())?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes >= u64::MAX as f64 || bytes.fract() != 0.0 {
        return Err(invalid());
    }
    // finite, non-negative, integral and below u64::MAX
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(bytes as u64)
}

/// Parse a comma-separated list of block sizes into candidates
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for a malformed size, a zero size or a
/// duplicate.
pub fn parse_block_sizes(s: &str) -> Result<Vec<BlockSizeCandidate>> {
    let sizes = s
        .split(',')
        .map(|part| parse_size(part.trim()))
        .collect::<Result<Vec<u64>>>()?;
    candidates_from_sizes(&sizes)
}

/// Format bytes as human-readable size
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    let (unit, name) = if bytes >= GB {
        (GB, "GB")
    } else if bytes >= MB {
        (MB, "MB")
    } else if bytes >= KB {
        (KB, "KB")
    } else {
        return format!("{bytes} B");
    };

    if bytes % unit == 0 {
        format!("{} {name}", bytes / unit)
    } else {
        format!("{:.2} {name}", bytes as f64 / unit as f64)
    }
}

/// Format speed as human-readable string
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec >= GB {
        format!("{:.1} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{bytes_per_sec:.0} B/s")
    }
}

/// Format duration as human-readable string
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
