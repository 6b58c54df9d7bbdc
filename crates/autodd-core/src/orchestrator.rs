//! Duplication orchestrator
//!
//! Each iteration walks the same states:
//!
//! ```text
//! ResolveDevice -> ZeroizeBefore -> PrepareDrive -> FlushCache -> Copy
//!               -> FlushCacheAfter -> ZeroizeAfter -> Done
//! ```
//!
//! The leading wipe runs before partitioning, so the copy always targets the
//! partition table the preparer just wrote.
//!
//! A benchmark run repeats the iteration and records failures without
//! stopping; a production copy runs it once and fails on the first error.
//! The destination is only ever addressed through its WWID, re-resolved at
//! the start of every iteration and again after re-enumeration.

use crate::benchmark::{format_size, Benchmark, BenchmarkEvent, BenchmarkReport};
use crate::cache;
use crate::config::DuplicationConfig;
use crate::copy::{CopyEngine, CopyReport, CopySpec};
use crate::error::{Error, Result};
use crate::prepare::Preparer;
use crate::zeroize::zeroize;
use autodd_detect::{BlockDeviceSource, DeviceRef, DeviceResolver};
use autodd_platform::{ByteCopier, DiskOps};
use serde::Serialize;
use std::fmt;

const MIB: u64 = 1024 * 1024;

/// A state of the per-iteration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    /// Resolve source and destination by WWID
    ResolveDevice,
    /// Unmount and zero the destination boundaries before partitioning
    ZeroizeBefore,
    /// Unmount, repartition, rebind and format the destination
    PrepareDrive,
    /// Sync and drop caches before copying
    FlushCache,
    /// Run the benchmark or production copy
    Copy,
    /// Sync and drop caches after copying
    FlushCacheAfter,
    /// Zero the destination boundaries after copying
    ZeroizeAfter,
    /// Iteration complete
    Done,
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveDevice => "resolve device",
            Self::ZeroizeBefore => "zeroize before prepare",
            Self::PrepareDrive => "prepare drive",
            Self::FlushCache => "flush cache",
            Self::Copy => "copy",
            Self::FlushCacheAfter => "flush cache after copy",
            Self::ZeroizeAfter => "zeroize after copy",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// What a successful iteration produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IterationDetail {
    /// A block size sweep
    Benchmark(BenchmarkReport),
    /// A production copy
    Copy(CopyReport),
}

/// How an iteration ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum IterationOutcome {
    /// Every state completed
    Success(IterationDetail),

    /// A state failed; later states did not run
    Failure {
        /// The failing state
        state: IterationState,
        /// Why it failed
        reason: String,
    },
}

/// One pass of the run loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// One-based iteration number
    pub index: u32,

    /// Destination as last resolved during the iteration
    pub target: DeviceRef,

    /// How the iteration ended
    pub outcome: IterationOutcome,
}

impl IterationRecord {
    /// Whether the iteration completed
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, IterationOutcome::Success(_))
    }
}

/// Result of a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRun {
    /// One record per iteration
    pub records: Vec<IterationRecord>,

    /// Measurements merged across successful iterations
    pub report: Option<BenchmarkReport>,
}

impl BenchmarkRun {
    /// The winning block size, if any iteration completed
    #[must_use]
    pub fn best_block_size(&self) -> Option<u64> {
        self.report
            .as_ref()
            .map(|r| r.best.candidate.size_bytes())
    }
}

/// Progress notification from a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// An iteration entered a state
    State {
        /// One-based iteration number
        iteration: u32,
        /// State entered
        state: IterationState,
    },

    /// Benchmark progress inside the copy state
    Benchmark(BenchmarkEvent),
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Benchmark { size: u64 },
    Copy { block_size: u64 },
}

struct StepFailure {
    target: DeviceRef,
    state: IterationState,
    error: Error,
}

fn at(state: IterationState, target: &DeviceRef) -> impl FnOnce(Error) -> StepFailure {
    let target = target.clone();
    move |error| StepFailure {
        target,
        state,
        error,
    }
}

/// Runs benchmark and production copies between two devices
pub struct Duplicator<'a> {
    devices: &'a dyn BlockDeviceSource,
    disk: &'a dyn DiskOps,
    copier: &'a dyn ByteCopier,
    config: DuplicationConfig,
    observer: Option<Box<dyn FnMut(&RunEvent) + 'a>>,
}

impl<'a> Duplicator<'a> {
    /// Create a duplicator over the given OS primitives
    pub fn new(
        devices: &'a dyn BlockDeviceSource,
        disk: &'a dyn DiskOps,
        copier: &'a dyn ByteCopier,
        config: DuplicationConfig,
    ) -> Self {
        Self {
            devices,
            disk,
            copier,
            config,
            observer: None,
        }
    }

    /// Set a progress callback
    #[must_use]
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&RunEvent) + 'a,
    {
        self.observer = Some(Box::new(callback));
        self
    }

    /// Get the current configuration
    #[must_use]
    pub const fn config(&self) -> &DuplicationConfig {
        &self.config
    }

    /// Capture a device given as a path (`/dev/...`) or a WWID
    ///
    /// # Errors
    ///
    /// Returns an identity error if the device is missing, has no WWID, or
    /// its WWID is shared with another device.
    pub fn capture(&self, device: &str) -> Result<DeviceRef> {
        let resolver = DeviceResolver::new(self.devices);
        let captured = if device.starts_with('/') {
            resolver.capture(device)?
        } else {
            resolver.resolve(device)?
        };
        Ok(captured)
    }

    /// Benchmark every configured candidate, `iterations` times
    ///
    /// Failed iterations are recorded and the loop moves on.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for an invalid configuration
    /// - An identity error if either device cannot be captured
    /// - [`Error::AllCandidatesFailed`] as soon as an iteration measures nothing
    pub fn run_benchmark(
        &mut self,
        source: &str,
        destination: &str,
        benchmark_size: u64,
    ) -> Result<BenchmarkRun> {
        self.config.validate()?;
        if benchmark_size == 0 {
            return Err(Error::InvalidConfig(
                "benchmark size must be greater than zero".to_string(),
            ));
        }
        let (source, destination) = self.capture_pair(source, destination)?;

        let iterations = self.config.iterations;
        let mut records = Vec::with_capacity(iterations as usize);
        let mut reports = Vec::new();

        for index in 1..=iterations {
            tracing::info!("Benchmark iteration {}/{} on {}", index, iterations, destination);
            let job = Job::Benchmark {
                size: benchmark_size,
            };

            match self.iteration(index, &source, &destination, job) {
                Ok((target, detail)) => {
                    if let IterationDetail::Benchmark(report) = &detail {
                        reports.push(report.clone());
                    }
                    records.push(IterationRecord {
                        index,
                        target,
                        outcome: IterationOutcome::Success(detail),
                    });
                }
                Err(failure) => {
                    if matches!(failure.error, Error::AllCandidatesFailed { .. }) {
                        return Err(failure.error);
                    }
                    tracing::error!(
                        "Iteration {} failed at {}: {}",
                        index,
                        failure.state,
                        failure.error
                    );
                    records.push(IterationRecord {
                        index,
                        target: failure.target,
                        outcome: IterationOutcome::Failure {
                            state: failure.state,
                            reason: failure.error.to_string(),
                        },
                    });
                }
            }
        }

        let report = if reports.is_empty() {
            None
        } else {
            Some(BenchmarkReport::combine(&reports)?)
        };
        Ok(BenchmarkRun { records, report })
    }

    /// Copy the whole source to the destination once with `block_size`
    ///
    /// # Errors
    ///
    /// Returns the first error of any state; nothing is retried.
    pub fn run_copy(
        &mut self,
        source: &str,
        destination: &str,
        block_size: u64,
    ) -> Result<IterationRecord> {
        self.config.validate()?;
        if block_size == 0 {
            return Err(Error::InvalidConfig(
                "block size must be greater than zero".to_string(),
            ));
        }
        let (source, destination) = self.capture_pair(source, destination)?;

        tracing::info!(
            "Copying {} to {} with {} blocks",
            source,
            destination,
            format_size(block_size)
        );

        match self.iteration(1, &source, &destination, Job::Copy { block_size }) {
            Ok((target, detail)) => Ok(IterationRecord {
                index: 1,
                target,
                outcome: IterationOutcome::Success(detail),
            }),
            Err(failure) => {
                tracing::error!("Copy failed at {}: {}", failure.state, failure.error);
                Err(failure.error)
            }
        }
    }

    /// The unbounded copy a boot-time service should run
    ///
    /// Both ends are written as `/dev/disk/by-id` links, which follow the
    /// WWID across reboots and re-enumeration. The destination is the whole
    /// disk: a boot-time copy never runs the preparer, so no partition is
    /// guaranteed to exist. The copy runs until the end of the source.
    ///
    /// # Errors
    ///
    /// - An identity error if either device cannot be captured or has no
    ///   stable link
    /// - [`Error::InvalidConfig`] for a zero block size or a source larger
    ///   than the destination
    pub fn service_spec(
        &self,
        source: &str,
        destination: &str,
        block_size: u64,
    ) -> Result<CopySpec> {
        if block_size == 0 {
            return Err(Error::InvalidConfig(
                "block size must be greater than zero".to_string(),
            ));
        }
        let (source, destination) = self.capture_pair(source, destination)?;

        let source_size = self
            .disk
            .device_size(&source.path)
            .map_err(|e| Error::DeviceNotFound(format!("{source}: {e}")))?;
        let destination_size = self
            .disk
            .device_size(&destination.path)
            .map_err(|e| Error::DeviceNotFound(format!("{destination}: {e}")))?;
        if source_size > destination_size {
            return Err(Error::InvalidConfig(format!(
                "source {} ({}) does not fit on destination {} ({})",
                source,
                format_size(source_size),
                destination,
                format_size(destination_size)
            )));
        }

        let resolver = DeviceResolver::new(self.devices);
        let source_link = resolver.stable_path(&source.wwid)?;
        let destination_link = resolver.stable_path(&destination.wwid)?;
        Ok(CopySpec::new(source_link, destination_link, block_size, None))
    }

    fn capture_pair(&self, source: &str, destination: &str) -> Result<(DeviceRef, DeviceRef)> {
        let source = self.capture(source)?;
        let destination = self.capture(destination)?;
        if source.wwid == destination.wwid {
            return Err(Error::InvalidConfig(format!(
                "source and destination are the same device (WWID {})",
                source.wwid
            )));
        }
        Ok((source, destination))
    }

    fn enter(&mut self, iteration: u32, state: IterationState) {
        tracing::debug!("Iteration {}: {}", iteration, state);
        if let Some(callback) = self.observer.as_mut() {
            callback(&RunEvent::State { iteration, state });
        }
    }

    /// Partition size for a transfer of `transfer` bytes
    fn partition_size_for(&self, transfer: u64) -> Result<u64> {
        let size = self
            .config
            .partition_size
            .unwrap_or_else(|| transfer.div_ceil(MIB) * MIB);
        if size < transfer {
            return Err(Error::InvalidConfig(format!(
                "partition size {} is smaller than the {} transfer",
                format_size(size),
                format_size(transfer)
            )));
        }
        Ok(size)
    }

    fn iteration(
        &mut self,
        index: u32,
        source: &DeviceRef,
        destination: &DeviceRef,
        job: Job,
    ) -> std::result::Result<(DeviceRef, IterationDetail), StepFailure> {
        use IterationState as S;

        let disk = self.disk;
        let resolver = DeviceResolver::new(self.devices);

        self.enter(index, S::ResolveDevice);
        let dst = resolver
            .resolve(&destination.wwid)
            .map_err(|e| at(S::ResolveDevice, destination)(e.into()))?;
        let src = resolver
            .resolve(&source.wwid)
            .map_err(|e| at(S::ResolveDevice, &dst)(e.into()))?;

        let (transfer, block_count) = match job {
            Job::Benchmark { size } => (size, None),
            Job::Copy { block_size } => {
                let source_size = disk
                    .device_size(&src.path)
                    .map_err(|e| at(S::ResolveDevice, &dst)(Error::DeviceNotFound(format!("{src}: {e}"))))?;
                let count = source_size / block_size;
                if count == 0 {
                    return Err(at(S::ResolveDevice, &dst)(Error::InvalidConfig(format!(
                        "source {} is smaller than one {} block",
                        src,
                        format_size(block_size)
                    ))));
                }
                (count * block_size, Some(count))
            }
        };
        let partition_size = self
            .partition_size_for(transfer)
            .map_err(at(S::ResolveDevice, &dst))?;

        self.enter(index, S::ZeroizeBefore);
        disk.unmount_device(&dst.path).map_err(|e| {
            at(S::ZeroizeBefore, &dst)(Error::ZeroizeFailed {
                device: dst.to_string(),
                reason: format!("unmount: {e}"),
            })
        })?;
        zeroize(disk, &dst, self.config.zeroize_region).map_err(at(S::ZeroizeBefore, &dst))?;

        self.enter(index, S::PrepareDrive);
        let dst = Preparer::new(disk, self.devices, self.config.prepare_options())
            .prepare(&dst, partition_size)
            .map_err(at(S::PrepareDrive, &dst))?;

        self.enter(index, S::FlushCache);
        cache::flush(disk).map_err(at(S::FlushCache, &dst))?;

        self.enter(index, S::Copy);
        let engine = CopyEngine::new(self.copier);
        let output = dst.partition_path();
        // dd into a missing node would create a regular file under /dev
        if !disk.is_block_device(&output) {
            return Err(at(S::Copy, &dst)(Error::CopyFailed {
                source_path: src.path.clone(),
                destination: output,
                reason: "not a block device".to_string(),
            }));
        }
        let detail = match (job, block_count) {
            (Job::Copy { block_size }, Some(count)) => {
                let spec = CopySpec::new(&src.path, &output, block_size, Some(count));
                let report = engine.copy(&spec).map_err(at(S::Copy, &dst))?;
                IterationDetail::Copy(report)
            }
            _ => {
                let observer = &mut self.observer;
                let mut forward = |event: &BenchmarkEvent| {
                    if let Some(callback) = observer.as_mut() {
                        callback(&RunEvent::Benchmark(event.clone()));
                    }
                };
                let report = Benchmark::new(disk, engine)
                    .run(
                        &src.path,
                        &output,
                        transfer,
                        &self.config.candidates,
                        &mut forward,
                    )
                    .map_err(at(S::Copy, &dst))?;
                IterationDetail::Benchmark(report)
            }
        };

        self.enter(index, S::FlushCacheAfter);
        cache::flush(disk).map_err(at(S::FlushCacheAfter, &dst))?;

        self.enter(index, S::ZeroizeAfter);
        zeroize(disk, &dst, self.config.zeroize_region).map_err(at(S::ZeroizeAfter, &dst))?;

        self.enter(index, S::Done);
        Ok((dst, detail))
    }
}
