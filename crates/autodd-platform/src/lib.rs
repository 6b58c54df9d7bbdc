//! # autodd Platform
//!
//! Platform adapters for the destructive device operations autodd performs:
//! unmounting, partitioning, forced re-enumeration, filesystem creation,
//! cache control, raw region writes and `dd` invocation.
//!
//! ## Safety
//!
//! Every operation here can destroy data. Callers must resolve the target by
//! WWID (see `autodd-detect`) immediately before invoking anything in this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::time::Duration;
use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device access denied (need elevated privileges)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Device is busy or locked
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to unmount device
    #[error("Unmount failed: {0}")]
    UnmountFailed(String),

    /// Operation not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// External command failed or could not be started
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Offset of the single partition autodd creates (1 MiB alignment)
pub const PARTITION_START: u64 = 1024 * 1024;

/// Information about an open device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device path
    pub path: String,

    /// Total size in bytes (0 if it could not be determined)
    pub size: u64,
}

/// Raw positional access to a whole device
pub trait RawDevice: Send {
    /// Get information about the device
    fn info(&self) -> &DeviceInfo;

    /// Get the device size in bytes
    fn size(&self) -> u64 {
        self.info().size
    }

    /// Write all of `data` at a specific offset
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush pending writes for this device to stable storage
    fn sync(&self) -> Result<()>;
}

/// Device management operations used to prepare a drive
///
/// Implementations perform exactly one OS-level action per call and report
/// success or failure; ordering and retries belong to the caller.
pub trait DiskOps {
    /// Unmount every mounted partition of a device; nothing mounted is success
    fn unmount_device(&self, path: &str) -> Result<()>;

    /// Destroy all partition table structures on a device
    fn delete_partitions(&self, path: &str) -> Result<()>;

    /// Create a fresh table with one primary partition of `size_bytes` at `start_bytes`
    fn create_partition(&self, path: &str, start_bytes: u64, size_bytes: u64) -> Result<()>;

    /// Force the kernel to drop and re-discover the device
    fn rebind_device(&self, path: &str) -> Result<()>;

    /// Create a filesystem of the given type on a partition
    fn format_filesystem(&self, partition_path: &str, fstype: &str) -> Result<()>;

    /// Size of a device in bytes
    fn device_size(&self, path: &str) -> Result<u64>;

    /// Flush all pending writes system-wide
    fn sync_all(&self) -> Result<()>;

    /// Drop clean page, dentry and inode caches
    fn drop_caches(&self) -> Result<()>;

    /// Open a whole device for positional writes
    fn open_device(&self, path: &str) -> Result<Box<dyn RawDevice>>;

    /// Whether `path` currently names a block device node
    fn is_block_device(&self, path: &str) -> bool;
}

/// A single `dd` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdRequest {
    /// Input path (`if=`)
    pub input: String,

    /// Output path (`of=`)
    pub output: String,

    /// Block size in bytes (`bs=`)
    pub block_size: u64,

    /// Number of blocks (`count=`); `None` copies until end of input
    pub count: Option<u64>,

    /// Physically write data before `dd` exits (`conv=fsync`)
    pub fsync: bool,
}

impl DdRequest {
    /// Operands passed to `dd`
    ///
    /// `iflag=fullblock` makes every counted block a full block, so a transfer
    /// of `count` blocks moves exactly `count * block_size` bytes or fails short.
    /// `conv=nocreat` makes a missing output node an error instead of a new
    /// regular file under `/dev`.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("if={}", self.input),
            format!("of={}", self.output),
            format!("bs={}", self.block_size),
        ];
        if let Some(count) = self.count {
            args.push(format!("count={count}"));
        }
        args.push("iflag=fullblock".to_string());
        args.push("status=progress".to_string());
        if self.fsync {
            args.push("conv=fsync,nocreat".to_string());
        } else {
            args.push("conv=nocreat".to_string());
        }
        args
    }

    /// Shell command line for this invocation
    #[must_use]
    pub fn command_line(&self) -> String {
        format!("dd {}", self.args().join(" "))
    }
}

/// Outcome of a completed `dd` run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DdReport {
    /// Bytes reported copied by `dd`
    pub transferred_bytes: u64,

    /// Wall-clock time including the final sync
    pub elapsed: Duration,
}

/// Byte-level device copy
pub trait ByteCopier {
    /// Run the copy to completion
    fn copy(&self, request: &DdRequest) -> Result<DdReport>;
}

/// Parse the final summary line `dd` prints to stderr
///
/// Returns `(bytes_copied, seconds)` from a line like
/// `1073741824 bytes (1.1 GB, 1.0 GiB) copied, 5.21 s, 206 MB/s`.
#[must_use]
pub fn parse_dd_summary(output: &str) -> Option<(u64, f64)> {
    let line = output
        .split(['\n', '\r'])
        .filter(|l| l.contains(" bytes") && l.contains("copied"))
        .last()?;

    let bytes = line.split_whitespace().next()?.parse::<u64>().ok()?;

    let after = line.split("copied,").nth(1)?;
    let secs = after
        .split(',')
        .next()?
        .trim()
        .trim_end_matches('s')
        .trim()
        .parse::<f64>()
        .ok()?;

    Some((bytes, secs))
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::LinuxPlatform as Platform;
        pub use linux::LinuxDevice;
    } else {
        /// Stand-in platform for targets autodd does not support
        #[derive(Debug, Clone, Copy, Default)]
        pub struct Platform;

        fn unsupported<T>() -> Result<T> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        impl DiskOps for Platform {
            fn unmount_device(&self, _path: &str) -> Result<()> { unsupported() }
            fn delete_partitions(&self, _path: &str) -> Result<()> { unsupported() }
            fn create_partition(&self, _path: &str, _start: u64, _size: u64) -> Result<()> { unsupported() }
            fn rebind_device(&self, _path: &str) -> Result<()> { unsupported() }
            fn format_filesystem(&self, _path: &str, _fstype: &str) -> Result<()> { unsupported() }
            fn device_size(&self, _path: &str) -> Result<u64> { unsupported() }
            fn sync_all(&self) -> Result<()> { unsupported() }
            fn drop_caches(&self) -> Result<()> { unsupported() }
            fn open_device(&self, _path: &str) -> Result<Box<dyn RawDevice>> { unsupported() }
            fn is_block_device(&self, _path: &str) -> bool { false }
        }

        impl ByteCopier for Platform {
            fn copy(&self, _request: &DdRequest) -> Result<DdReport> { unsupported() }
        }
    }
}

/// Check if running with elevated privileges
#[cfg(unix)]
#[must_use]
pub fn has_elevated_privileges() -> bool {
    // SAFETY: geteuid() is a simple syscall that returns the effective user ID.
    // It has no preconditions and cannot cause undefined behavior.
    #[allow(unsafe_code)]
    unsafe {
        libc::geteuid() == 0
    }
}

/// Check if running with elevated privileges (unsupported platform)
#[cfg(not(unix))]
#[must_use]
pub fn has_elevated_privileges() -> bool {
    false
}

// ============================================================================
// UNIT TESTS
// ============================================================================
