//! Destructive drive preparation
//!
//! Every call runs the full sequence: unmount, repartition, force
//! re-enumeration, wait for the device to come back under its WWID, format.
//! Each step is a hard precondition for the next and nothing is remembered
//! between calls.

use crate::error::{Error, Result};
use autodd_detect::{BlockDeviceSource, DetectError, DeviceRef, DeviceResolver};
use autodd_platform::{DiskOps, PARTITION_START};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default filesystem created on the new partition
pub const DEFAULT_FSTYPE: &str = "ext4";

/// Default wait before each re-resolution after a rebind
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Default number of re-resolution attempts after a rebind
pub const DEFAULT_SETTLE_ATTEMPTS: u32 = 5;

/// A step of drive preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareStep {
    /// Unmount every mounted partition
    Unmount,
    /// Wipe the partition table and create one partition
    Partition,
    /// Force the kernel to drop and re-discover the device
    Rebind,
    /// Wait for the device to reappear under its WWID
    Settle,
    /// Create a filesystem on the new partition
    Format,
}

impl fmt::Display for PrepareStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmount => "unmount",
            Self::Partition => "partition",
            Self::Rebind => "rebind",
            Self::Settle => "settle",
            Self::Format => "format",
        };
        write!(f, "{name}")
    }
}

/// Knobs for drive preparation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Filesystem type passed to `mkfs.<fstype>`
    pub fstype: String,

    /// Wait before each re-resolution attempt
    pub settle_delay: Duration,

    /// Maximum re-resolution attempts after the rebind
    pub settle_attempts: u32,

    /// Bytes at the end of the device the partition must stay clear of
    pub reserved_tail: u64,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            fstype: DEFAULT_FSTYPE.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
            reserved_tail: 0,
        }
    }
}

/// Runs the preparation sequence against one device
pub struct Preparer<'a> {
    disk: &'a dyn DiskOps,
    resolver: DeviceResolver<'a>,
    options: PrepareOptions,
}

impl<'a> Preparer<'a> {
    /// Create a preparer
    pub fn new(
        disk: &'a dyn DiskOps,
        devices: &'a dyn BlockDeviceSource,
        options: PrepareOptions,
    ) -> Self {
        Self {
            disk,
            resolver: DeviceResolver::new(devices),
            options,
        }
    }

    /// Prepare `device` with one partition of `partition_size` bytes
    ///
    /// Returns the device as re-resolved after the rebind; its path may differ
    /// from the input path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrepareFailed`] naming the failing step. No later step
    /// runs after a failure.
    pub fn prepare(&self, device: &DeviceRef, partition_size: u64) -> Result<DeviceRef> {
        tracing::info!("Unmounting {}", device);
        self.disk
            .unmount_device(&device.path)
            .map_err(|e| step_failed(PrepareStep::Unmount, device, e))?;

        self.partition(device, partition_size)
            .map_err(|reason| step_failed(PrepareStep::Partition, device, reason))?;

        tracing::info!("Rebinding {}", device);
        self.disk
            .rebind_device(&device.path)
            .map_err(|e| step_failed(PrepareStep::Rebind, device, e))?;

        let settled = self
            .settle(&device.wwid)
            .map_err(|reason| step_failed(PrepareStep::Settle, device, reason))?;
        if settled.path != device.path {
            tracing::info!("{} re-enumerated as {}", device.path, settled.path);
        }

        let partition = settled.partition_path();
        tracing::info!("Formatting {} as {}", partition, self.options.fstype);
        self.disk
            .format_filesystem(&partition, &self.options.fstype)
            .map_err(|e| step_failed(PrepareStep::Format, &settled, e))?;

        Ok(settled)
    }

    fn partition(&self, device: &DeviceRef, size: u64) -> std::result::Result<(), String> {
        if size == 0 {
            return Err("partition size must be greater than zero".to_string());
        }

        let device_size = self.disk.device_size(&device.path).map_err(|e| e.to_string())?;
        let needed = PARTITION_START
            .checked_add(size)
            .and_then(|n| n.checked_add(self.options.reserved_tail))
            .ok_or_else(|| format!("partition size {size} overflows"))?;
        if needed > device_size {
            return Err(format!(
                "partition of {size} bytes does not fit: {needed} bytes needed, device has {device_size}"
            ));
        }

        tracing::info!("Repartitioning {} with {} bytes", device, size);
        self.disk
            .delete_partitions(&device.path)
            .map_err(|e| e.to_string())?;
        self.disk
            .create_partition(&device.path, PARTITION_START, size)
            .map_err(|e| e.to_string())
    }

    fn settle(&self, wwid: &str) -> std::result::Result<DeviceRef, String> {
        let attempts = self.options.settle_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            std::thread::sleep(self.options.settle_delay);
            match self.resolver.resolve(wwid) {
                Ok(found) => return Ok(found),
                // a second device carrying the WWID is never waited out
                Err(e @ DetectError::AmbiguousDevice { .. }) => return Err(e.to_string()),
                Err(e) => {
                    tracing::debug!("Settle attempt {}/{}: {}", attempt, attempts, e);
                    last = e.to_string();
                }
            }
        }

        Err(format!(
            "WWID {wwid} did not reappear after {attempts} attempts ({last})"
        ))
    }
}

fn step_failed(step: PrepareStep, device: &DeviceRef, reason: impl fmt::Display) -> Error {
    Error::PrepareFailed {
        step,
        device: device.path.clone(),
        wwid: device.wwid.clone(),
        reason: reason.to_string(),
    }
}
