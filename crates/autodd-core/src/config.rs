//! Runtime configuration for duplication runs

use crate::benchmark::{default_candidates, BlockSizeCandidate};
use crate::error::{Error, Result};
use crate::prepare::{
    PrepareOptions, DEFAULT_FSTYPE, DEFAULT_SETTLE_ATTEMPTS, DEFAULT_SETTLE_DELAY,
};
use crate::zeroize::DEFAULT_REGION_SIZE;
use autodd_platform::PARTITION_START;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicationConfig {
    /// Benchmark passes to run
    pub iterations: u32,

    /// Block sizes to benchmark
    pub candidates: Vec<BlockSizeCandidate>,

    /// Partition size; `None` sizes the partition to the transfer
    pub partition_size: Option<u64>,

    /// Filesystem created on the destination partition
    pub fstype: String,

    /// Bytes zeroed at each end of the destination
    pub zeroize_region: u64,

    /// Wait before each re-resolution after a rebind
    pub settle_delay: Duration,

    /// Re-resolution attempts after a rebind
    pub settle_attempts: u32,
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            candidates: default_candidates(),
            partition_size: None,
            fstype: DEFAULT_FSTYPE.to_string(),
            zeroize_region: DEFAULT_REGION_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
        }
    }
}

impl DuplicationConfig {
    /// Create a new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of benchmark passes
    #[must_use]
    pub const fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the block size candidates
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<BlockSizeCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Set a fixed partition size
    #[must_use]
    pub const fn partition_size(mut self, size: Option<u64>) -> Self {
        self.partition_size = size;
        self
    }

    /// Set the filesystem type
    #[must_use]
    pub fn fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = fstype.into();
        self
    }

    /// Set the zeroize region size
    #[must_use]
    pub const fn zeroize_region(mut self, region: u64) -> Self {
        self.zeroize_region = region;
        self
    }

    /// Set the settle delay
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the settle attempts
    #[must_use]
    pub const fn settle_attempts(mut self, attempts: u32) -> Self {
        self.settle_attempts = attempts;
        self
    }

    /// Check the configuration for values no run can succeed with
    ///
    /// The zeroize region must fit in front of the partition start, so the
    /// leading wipe never reaches partition data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        if self.candidates.is_empty() {
            return Err(Error::InvalidConfig(
                "no block size candidates configured".to_string(),
            ));
        }
        for (i, c) in self.candidates.iter().enumerate() {
            if self.candidates[..i].contains(c) {
                return Err(Error::InvalidConfig(format!(
                    "block size {c} listed more than once"
                )));
            }
        }
        if self.partition_size == Some(0) {
            return Err(Error::InvalidConfig(
                "partition size must be greater than zero".to_string(),
            ));
        }
        if self.fstype.is_empty() || !self.fstype.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(format!(
                "invalid filesystem type {:?}",
                self.fstype
            )));
        }
        if self.zeroize_region == 0 || self.zeroize_region > PARTITION_START {
            return Err(Error::InvalidConfig(format!(
                "zeroize region must be between 1 and {PARTITION_START} bytes"
            )));
        }
        if self.settle_attempts == 0 {
            return Err(Error::InvalidConfig(
                "settle attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Drive preparation options derived from this configuration
    #[must_use]
    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions {
            fstype: self.fstype.clone(),
            settle_delay: self.settle_delay,
            settle_attempts: self.settle_attempts,
            reserved_tail: self.zeroize_region,
        }
    }
}
