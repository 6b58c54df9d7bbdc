//! Boundary zeroing
//!
//! Overwrites a leading and a trailing region of a whole device. Before
//! partitioning this removes stale signatures; after a copy it removes
//! residual boot signatures from the duplicate.

use crate::error::{Error, Result};
use autodd_detect::DeviceRef;
use autodd_platform::DiskOps;
use serde::Serialize;
use std::ops::Range;

/// Default region size (1 MiB)
pub const DEFAULT_REGION_SIZE: u64 = 1024 * 1024;

/// Largest single write issued while zeroing
const WRITE_CHUNK: u64 = 1024 * 1024;

/// Byte ranges overwritten by a successful zeroize
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZeroizeReport {
    /// Size of the device in bytes
    pub device_size: u64,

    /// Leading region, always starting at 0
    pub leading: Range<u64>,

    /// Trailing region, always ending at the device size
    pub trailing: Range<u64>,
}

/// Compute the leading and trailing regions for a device
///
/// The trailing region starts at `size - region`, which is
/// `(size / region - 1) * region` whenever the size is a multiple of the region.
///
/// # Errors
///
/// Returns a reason when the region is empty, the size is unknown (0), or
/// the device cannot hold two non-overlapping regions.
pub fn regions(
    device_size: u64,
    region: u64,
) -> std::result::Result<(Range<u64>, Range<u64>), String> {
    if region == 0 {
        return Err("region size must be greater than zero".to_string());
    }
    if device_size == 0 {
        return Err("device size could not be determined".to_string());
    }
    if device_size < region.saturating_mul(2) {
        return Err(format!(
            "device size {device_size} is smaller than two {region} byte regions"
        ));
    }

    let trailing_start = device_size - region;
    Ok((0..region, trailing_start..device_size))
}

/// Overwrite the first and last `region` bytes of a device with zeros
///
/// # Errors
///
/// Returns [`Error::ZeroizeFailed`] if the device cannot be opened, its size
/// is unknown or too small, or any write or the final sync fails.
pub fn zeroize(disk: &dyn DiskOps, device: &DeviceRef, region: u64) -> Result<ZeroizeReport> {
    let failed = |reason: String| Error::ZeroizeFailed {
        device: device.to_string(),
        reason,
    };

    let mut handle = disk
        .open_device(&device.path)
        .map_err(|e| failed(format!("open: {e}")))?;
    let device_size = handle.size();

    let (leading, trailing) = regions(device_size, region).map_err(failed)?;

    let zeros = vec![0u8; usize::try_from(region.min(WRITE_CHUNK)).unwrap_or(1024 * 1024)];
    for range in [&leading, &trailing] {
        let mut offset = range.start;
        while offset < range.end {
            let len = (range.end - offset).min(zeros.len() as u64);
            // len <= zeros.len(), which came from a usize
            #[allow(clippy::cast_possible_truncation)]
            let chunk = &zeros[..len as usize];
            handle
                .write_at(offset, chunk)
                .map_err(|e| failed(format!("write at {offset}: {e}")))?;
            offset += len;
        }
    }

    handle.sync().map_err(|e| failed(format!("sync: {e}")))?;

    tracing::info!("Zeroed {:?} and {:?} on {}", leading, trailing, device);

    Ok(ZeroizeReport {
        device_size,
        leading,
        trailing,
    })
}
