//! # autodd Detect
//!
//! Stable block device identification by WWID (World-Wide Identifier).
//! This is a safety-critical component: duplicating onto the wrong physical
//! device is the failure mode every other part of autodd is built around.
//!
//! ## Identity Rules
//!
//! - A device is addressed by its WWID, never by its kernel name alone
//! - Device paths are re-resolved after anything that can re-enumerate a device
//! - A WWID matching more than one device is an error, never a guess

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Device identification errors
#[derive(Error, Debug)]
pub enum DetectError {
    /// Failed to enumerate block devices
    #[error("Failed to enumerate block devices: {0}")]
    EnumerationFailed(String),

    /// No device carries the requested identity
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// More than one device carries the requested WWID
    #[error("Ambiguous device: WWID {wwid} matches {}", paths.join(", "))]
    AmbiguousDevice {
        /// The WWID that was looked up
        wwid: String,
        /// Every device path carrying that WWID
        paths: Vec<String>,
    },

    /// The device exists but exposes no usable identity
    #[error("Device {0} has no WWID")]
    MissingIdentity(String),

    /// The device has no persistent `/dev/disk/by-id` link
    #[error("{0} has no /dev/disk/by-id link")]
    NoStableLink(String),

    /// Platform not supported
    #[error("Platform not supported")]
    UnsupportedPlatform,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for device identification operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// Type of drive connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DriveType {
    /// USB connected drive
    Usb,
    /// SD card (via built-in reader)
    SdCard,
    /// `NVMe` drive
    Nvme,
    /// SATA or SCSI drive
    Sata,
    /// Other/unknown connection type
    #[default]
    Other,
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::SdCard => write!(f, "SD Card"),
            Self::Nvme => write!(f, "NVMe"),
            Self::Sata => write!(f, "SATA"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// A whole-disk block device as seen during enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel name (e.g., `sdb`, `nvme0n1`)
    pub name: String,

    /// Device node path (e.g., `/dev/sdb`)
    pub path: String,

    /// Hardware identity, if the device exposes one
    pub wwid: Option<String>,

    /// Size in bytes
    pub size: u64,

    /// Whether the kernel reports the device as removable
    pub removable: bool,

    /// Type of drive connection
    pub drive_type: DriveType,

    /// Persistent `/dev/disk/by-id` link naming the same identity as `wwid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_path: Option<String>,
}

impl BlockDevice {
    /// Create a new device entry for the given kernel name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: format!("/dev/{name}"),
            name,
            ..Default::default()
        }
    }

    /// Builder: set the WWID
    #[must_use]
    pub fn with_wwid(mut self, wwid: impl Into<String>) -> Self {
        self.wwid = Some(wwid.into());
        self
    }

    /// Builder: set the size
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Builder: set the persistent link
    #[must_use]
    pub fn with_stable_path(mut self, path: impl Into<String>) -> Self {
        self.stable_path = Some(path.into());
        self
    }

    /// Builder: set the drive type
    #[must_use]
    pub const fn with_drive_type(mut self, drive_type: DriveType) -> Self {
        self.drive_type = drive_type;
        self
    }

    /// Whether this device carries exactly the given WWID
    #[must_use]
    pub fn has_wwid(&self, wwid: &str) -> bool {
        self.wwid
            .as_deref()
            .is_some_and(|own| own.trim() == wwid.trim())
    }
}

/// A device addressed by its WWID, with the path it currently resolves to
///
/// The `path` is only valid until the next re-enumeration. Anything destructive
/// must resolve the WWID again first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Hardware identity, fixed for the lifetime of a run
    pub wwid: String,

    /// Device node path at the time of the last resolution
    pub path: String,

    /// Suffix appended to `path` to name the first partition (`1` or `p1`)
    pub partition_suffix: String,
}

impl DeviceRef {
    /// Create a device reference, deriving the partition suffix from the path
    pub fn new(wwid: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let partition_suffix = partition_suffix_for(&path);
        Self {
            wwid: wwid.into(),
            path,
            partition_suffix,
        }
    }

    /// Path of the first partition on this device
    #[must_use]
    pub fn partition_path(&self) -> String {
        format!("{}{}", self.path, self.partition_suffix)
    }

    /// Kernel name of the device (last path component)
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (WWID {})", self.path, self.wwid)
    }
}

/// Partition suffix for a device path
///
/// Kernel names ending in a digit (`nvme0n1`, `mmcblk0`, `loop3`) separate the
/// partition number with `p`.
#[must_use]
pub fn partition_suffix_for(path: &str) -> String {
    if path.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        "p1".to_string()
    } else {
        "1".to_string()
    }
}

/// Source of whole-disk block devices
#[cfg_attr(test, mockall::automock)]
pub trait BlockDeviceSource {
    /// Enumerate the block devices currently present
    ///
    /// # Errors
    ///
    /// Returns an error if the device list cannot be read.
    fn block_devices(&self) -> Result<Vec<BlockDevice>>;
}

/// Maps WWIDs to current device paths
#[derive(Clone, Copy)]
pub struct DeviceResolver<'a> {
    source: &'a dyn BlockDeviceSource,
}

impl<'a> DeviceResolver<'a> {
    /// Create a resolver over the given device source
    pub fn new(source: &'a dyn BlockDeviceSource) -> Self {
        Self { source }
    }

    /// Resolve a WWID to the single device currently carrying it
    ///
    /// # Errors
    ///
    /// - [`DetectError::DeviceNotFound`] if no device carries the WWID
    /// - [`DetectError::AmbiguousDevice`] if more than one device does
    /// - Any enumeration error from the underlying source
    pub fn resolve(&self, wwid: &str) -> Result<DeviceRef> {
        let device = self.find(wwid)?;
        tracing::debug!("Resolved WWID {} to {}", wwid.trim(), device.path);
        Ok(DeviceRef::new(wwid.trim(), device.path))
    }

    /// The `/dev/disk/by-id` link of the single device carrying a WWID
    ///
    /// Unlike a kernel name, the link survives reboots and re-enumeration,
    /// so it is what anything run later must be given.
    ///
    /// # Errors
    ///
    /// - Every error [`DeviceResolver::resolve`] returns
    /// - [`DetectError::NoStableLink`] if the device has no by-id link
    pub fn stable_path(&self, wwid: &str) -> Result<String> {
        self.find(wwid)?
            .stable_path
            .ok_or_else(|| DetectError::NoStableLink(format!("WWID {}", wwid.trim())))
    }

    fn find(&self, wwid: &str) -> Result<BlockDevice> {
        let devices = self.source.block_devices()?;
        let mut matches: Vec<BlockDevice> =
            devices.into_iter().filter(|d| d.has_wwid(wwid)).collect();

        match matches.len() {
            0 => Err(DetectError::DeviceNotFound(format!("WWID {}", wwid.trim()))),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut paths: Vec<String> = matches.into_iter().map(|d| d.path).collect();
                paths.sort();
                Err(DetectError::AmbiguousDevice {
                    wwid: wwid.trim().to_string(),
                    paths,
                })
            }
        }
    }

    /// Capture the identity of a device known by path
    ///
    /// The captured WWID is resolved once more so that a WWID shared by several
    /// devices is rejected up front.
    ///
    /// # Errors
    ///
    /// - [`DetectError::DeviceNotFound`] if no device has this path
    /// - [`DetectError::MissingIdentity`] if the device has no WWID
    /// - [`DetectError::AmbiguousDevice`] if the WWID is not unique
    pub fn capture(&self, path: &str) -> Result<DeviceRef> {
        let devices = self.source.block_devices()?;
        let device = devices
            .into_iter()
            .find(|d| d.path == path || d.name == path)
            .ok_or_else(|| DetectError::DeviceNotFound(path.to_string()))?;

        let wwid = device
            .wwid
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| DetectError::MissingIdentity(device.path.clone()))?;

        tracing::info!("Captured WWID {} for {}", wwid.trim(), device.path);
        self.resolve(&wwid)
    }
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::list_block_devices;
    } else {
        /// List block devices (unsupported platform)
        pub fn list_block_devices() -> Result<Vec<BlockDevice>> {
            Err(DetectError::UnsupportedPlatform)
        }
    }
}

/// Block devices of the running system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevices;

impl BlockDeviceSource for SystemDevices {
    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        list_block_devices()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(devices: Vec<BlockDevice>) -> MockBlockDeviceSource {
        let mut source = MockBlockDeviceSource::new();
        source
            .expect_block_devices()
            .returning(move || Ok(devices.clone()));
        source
    }

    // -------------------------------------------------------------------------
    // partition_suffix_for tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_partition_suffix_sd() {
        assert_eq!(partition_suffix_for("/dev/sdb"), "1");
        assert_eq!(partition_suffix_for("/dev/vda"), "1");
    }

    #[test]
    fn test_partition_suffix_digit_names() {
        assert_eq!(partition_suffix_for("/dev/nvme0n1"), "p1");
        assert_eq!(partition_suffix_for("/dev/mmcblk0"), "p1");
        assert_eq!(partition_suffix_for("/dev/loop3"), "p1");
    }

    // -------------------------------------------------------------------------
    // DeviceRef tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_device_ref_partition_path() {
        let dev = DeviceRef::new("naa.5000c500a1b2c3d4", "/dev/sdc");
        assert_eq!(dev.partition_path(), "/dev/sdc1");
        assert_eq!(dev.name(), "sdc");

        let dev = DeviceRef::new("eui.0025388b71b2", "/dev/nvme1n1");
        assert_eq!(dev.partition_path(), "/dev/nvme1n1p1");
    }

    #[test]
    fn test_device_ref_display_names_wwid() {
        let dev = DeviceRef::new("naa.5000", "/dev/sdb");
        let shown = dev.to_string();
        assert!(shown.contains("/dev/sdb"));
        assert!(shown.contains("naa.5000"));
    }

    // -------------------------------------------------------------------------
    // DeviceResolver tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_single_match() {
        let source = source_with(vec![
            BlockDevice::new("sda").with_wwid("naa.1111"),
            BlockDevice::new("sdb").with_wwid("naa.2222"),
        ]);
        let resolver = DeviceResolver::new(&source);

        let dev = resolver.resolve("naa.2222").unwrap();
        assert_eq!(dev.path, "/dev/sdb");
        assert_eq!(dev.wwid, "naa.2222");
    }

    #[test]
    fn test_resolve_follows_renumbering() {
        // Same WWID, different kernel name on the second enumeration
        let mut source = MockBlockDeviceSource::new();
        let mut calls = 0;
        source.expect_block_devices().times(2).returning(move || {
            calls += 1;
            let name = if calls == 1 { "sdb" } else { "sdd" };
            Ok(vec![BlockDevice::new(name).with_wwid("naa.2222")])
        });
        let resolver = DeviceResolver::new(&source);

        assert_eq!(resolver.resolve("naa.2222").unwrap().path, "/dev/sdb");
        assert_eq!(resolver.resolve("naa.2222").unwrap().path, "/dev/sdd");
    }

    #[test]
    fn test_resolve_not_found() {
        let source = source_with(vec![BlockDevice::new("sda").with_wwid("naa.1111")]);
        let resolver = DeviceResolver::new(&source);

        let err = resolver.resolve("naa.9999").unwrap_err();
        assert!(matches!(err, DetectError::DeviceNotFound(_)));
        assert!(err.to_string().contains("naa.9999"));
    }

    #[test]
    fn test_resolve_ambiguous_is_never_a_pick() {
        let source = source_with(vec![
            BlockDevice::new("sdc").with_wwid("naa.dup"),
            BlockDevice::new("sdb").with_wwid("naa.dup"),
        ]);
        let resolver = DeviceResolver::new(&source);

        match resolver.resolve("naa.dup") {
            Err(DetectError::AmbiguousDevice { wwid, paths }) => {
                assert_eq!(wwid, "naa.dup");
                assert_eq!(paths, vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()]);
            }
            other => panic!("expected AmbiguousDevice, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_requires_exact_match() {
        let source = source_with(vec![BlockDevice::new("sdb").with_wwid("naa.22223")]);
        let resolver = DeviceResolver::new(&source);
        assert!(resolver.resolve("naa.2222").is_err());
    }

    #[test]
    fn test_resolve_ignores_devices_without_wwid() {
        let source = source_with(vec![
            BlockDevice::new("sda"),
            BlockDevice::new("sdb").with_wwid("naa.2222"),
        ]);
        let resolver = DeviceResolver::new(&source);
        assert_eq!(resolver.resolve("naa.2222").unwrap().path, "/dev/sdb");
    }

    #[test]
    fn test_resolve_propagates_enumeration_error() {
        let mut source = MockBlockDeviceSource::new();
        source
            .expect_block_devices()
            .returning(|| Err(DetectError::EnumerationFailed("boom".to_string())));
        let resolver = DeviceResolver::new(&source);
        assert!(matches!(
            resolver.resolve("naa.1"),
            Err(DetectError::EnumerationFailed(_))
        ));
    }

    #[test]
    fn test_capture_by_path() {
        let source = source_with(vec![
            BlockDevice::new("nvme0n1").with_wwid("eui.abcd"),
            BlockDevice::new("sdb").with_wwid("naa.2222"),
        ]);
        let resolver = DeviceResolver::new(&source);

        let dev = resolver.capture("/dev/nvme0n1").unwrap();
        assert_eq!(dev.wwid, "eui.abcd");
        assert_eq!(dev.partition_path(), "/dev/nvme0n1p1");
    }

    #[test]
    fn test_capture_without_wwid() {
        let source = source_with(vec![BlockDevice::new("sdb")]);
        let resolver = DeviceResolver::new(&source);
        assert!(matches!(
            resolver.capture("/dev/sdb"),
            Err(DetectError::MissingIdentity(_))
        ));
    }

    #[test]
    fn test_capture_unknown_path() {
        let source = source_with(vec![BlockDevice::new("sdb").with_wwid("naa.2")]);
        let resolver = DeviceResolver::new(&source);
        assert!(matches!(
            resolver.capture("/dev/sdz"),
            Err(DetectError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_capture_rejects_shared_wwid() {
        let source = source_with(vec![
            BlockDevice::new("sdb").with_wwid("naa.dup"),
            BlockDevice::new("sdc").with_wwid("naa.dup"),
        ]);
        let resolver = DeviceResolver::new(&source);
        assert!(matches!(
            resolver.capture("/dev/sdb"),
            Err(DetectError::AmbiguousDevice { .. })
        ));
    }

    #[test]
    fn test_stable_path() {
        let source = source_with(vec![
            BlockDevice::new("sdb")
                .with_wwid("usb-Flash_0001")
                .with_stable_path("/dev/disk/by-id/usb-Flash_0001"),
            BlockDevice::new("sdc").with_wwid("naa.3333"),
        ]);
        let resolver = DeviceResolver::new(&source);

        assert_eq!(
            resolver.stable_path("usb-Flash_0001").unwrap(),
            "/dev/disk/by-id/usb-Flash_0001"
        );
        let err = resolver.stable_path("naa.3333").unwrap_err();
        assert!(matches!(err, DetectError::NoStableLink(_)));
        assert_eq!(err.to_string(), "WWID naa.3333 has no /dev/disk/by-id link");
        assert!(matches!(
            resolver.stable_path("naa.missing"),
            Err(DetectError::DeviceNotFound(_))
        ));
    }

    // -------------------------------------------------------------------------
    // BlockDevice tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_block_device_serialization() {
        let dev = BlockDevice::new("sdb")
            .with_wwid("naa.2222")
            .with_size(1024)
            .with_drive_type(DriveType::Usb)
            .with_stable_path("/dev/disk/by-id/usb-Flash_0001");

        let json = serde_json::to_string(&dev).expect("Should serialize");
        assert!(json.contains("/dev/sdb"));
        assert!(json.contains("by-id"));
        assert!(json.contains("Usb"));

        let back: BlockDevice = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(back, dev);
    }

    #[test]
    fn test_has_wwid_trims() {
        let dev = BlockDevice::new("sdb").with_wwid("naa.2222\n");
        assert!(dev.has_wwid(" naa.2222"));
    }

    #[test]
    fn test_error_display() {
        let err = DetectError::AmbiguousDevice {
            wwid: "naa.1".to_string(),
            paths: vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Ambiguous device: WWID naa.1 matches /dev/sdb, /dev/sdc"
        );

        let err = DetectError::MissingIdentity("/dev/sdb".to_string());
        assert_eq!(err.to_string(), "Device /dev/sdb has no WWID");
    }
}
