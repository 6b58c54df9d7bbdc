//! Linux block device enumeration
//!
//! Uses /sys/block for device enumeration and WWID attributes, falling back to
//! the udev-maintained /dev/disk/by-id links when sysfs exposes no WWID.

use super::{BlockDevice, DetectError, DriveType, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const SYS_BLOCK: &str = "/sys/block";
const DISK_BY_ID: &str = "/dev/disk/by-id";

/// Stable by-id link prefixes, in order of preference after `wwn-`
const BY_ID_PREFIXES: &[&str] = &["usb-", "ata-", "nvme-", "scsi-"];

/// List all whole-disk block devices on Linux
///
/// # Errors
///
/// Returns an error if `/sys/block` doesn't exist or can't be read.
pub fn list_block_devices() -> Result<Vec<BlockDevice>> {
    list_block_devices_in(Path::new(SYS_BLOCK), Path::new(DISK_BY_ID))
}

/// List block devices from explicit sysfs and by-id roots
pub(crate) fn list_block_devices_in(sys_block: &Path, by_id: &Path) -> Result<Vec<BlockDevice>> {
    if !sys_block.exists() {
        return Err(DetectError::EnumerationFailed(format!(
            "{} not found",
            sys_block.display()
        )));
    }

    let by_id_links = read_by_id_links(by_id);
    let mut devices = Vec::new();

    for entry in fs::read_dir(sys_block)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        if should_skip_device(&name) {
            continue;
        }

        let links = by_id_links.get(&name).map_or(&[][..], Vec::as_slice);
        devices.push(parse_block_device(&entry.path(), &name, by_id, links));
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Check if a device should be skipped
pub(crate) fn should_skip_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("zram")
        || name.starts_with("sr")
        || name.starts_with("fd")
}

fn parse_block_device(
    sys_path: &Path,
    name: &str,
    by_id: &Path,
    by_id_links: &[String],
) -> BlockDevice {
    let size = read_sys_value(&sys_path.join("size"))
        .and_then(|s| s.parse::<u64>().ok())
        .map_or(0, |sectors| sectors * 512);

    let removable = read_sys_value(&sys_path.join("removable")).is_some_and(|s| s == "1");

    let wwid = read_sysfs_wwid(sys_path).or_else(|| identity_from_by_id(by_id_links));
    if wwid.is_none() {
        tracing::debug!("No WWID for {}", name);
    }

    let stable_path = identity_from_by_id(by_id_links)
        .map(|link| by_id.join(link).to_string_lossy().to_string());

    BlockDevice {
        name: name.to_string(),
        path: format!("/dev/{name}"),
        wwid,
        size,
        removable,
        drive_type: detect_drive_type(name, sys_path, by_id_links),
        stable_path,
    }
}

/// Read the WWID attribute (SCSI devices expose it under `device/`, `NVMe` at top level)
pub(crate) fn read_sysfs_wwid(sys_path: &Path) -> Option<String> {
    read_sys_value(&sys_path.join("device").join("wwid"))
        .or_else(|| read_sys_value(&sys_path.join("wwid")))
        .filter(|w| !w.is_empty())
}

/// Pick a stable identity from the by-id link names of a whole disk
pub(crate) fn identity_from_by_id(links: &[String]) -> Option<String> {
    if let Some(wwn) = links.iter().find(|l| l.starts_with("wwn-")) {
        return Some(wwn.clone());
    }

    BY_ID_PREFIXES
        .iter()
        .find_map(|prefix| links.iter().find(|l| l.starts_with(prefix)))
        .cloned()
}

/// Map kernel device name -> sorted by-id link names, skipping partition links
pub(crate) fn read_by_id_links(by_id: &Path) -> HashMap<String, Vec<String>> {
    let mut links: HashMap<String, Vec<String>> = HashMap::new();

    let Ok(entries) = fs::read_dir(by_id) else {
        return links;
    };

    for entry in entries.flatten() {
        let link_name = entry.file_name().to_string_lossy().to_string();
        if is_partition_link(&link_name) {
            continue;
        }

        // Target is usually something like "../../sdb"
        if let Ok(target) = fs::read_link(entry.path()) {
            if let Some(device_name) = target.file_name() {
                links
                    .entry(device_name.to_string_lossy().to_string())
                    .or_default()
                    .push(link_name);
            }
        }
    }

    for names in links.values_mut() {
        names.sort();
    }
    links
}

fn is_partition_link(link_name: &str) -> bool {
    link_name
        .rsplit_once("-part")
        .is_some_and(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Detect drive type from name, sysfs and by-id info
pub(crate) fn detect_drive_type(name: &str, sys_path: &Path, by_id_links: &[String]) -> DriveType {
    if name.starts_with("nvme") {
        return DriveType::Nvme;
    }

    if name.starts_with("mmcblk") {
        return DriveType::SdCard;
    }

    if by_id_links.iter().any(|l| l.starts_with("usb-")) {
        return DriveType::Usb;
    }

    if let Ok(subsystem_link) = fs::read_link(sys_path.join("device").join("subsystem")) {
        if let Some(subsystem_name) = subsystem_link.file_name() {
            let sub = subsystem_name.to_string_lossy();
            if sub == "usb" {
                return DriveType::Usb;
            }
            if sub == "scsi" || sub == "ata" {
                return DriveType::Sata;
            }
        }
    }

    DriveType::Other
}

fn read_sys_value(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn fake_disk(sys_block: &Path, name: &str, sectors: u64, wwid: Option<&str>) {
        let dir = sys_block.join(name);
        fs::create_dir_all(dir.join("device")).unwrap();
        fs::write(dir.join("size"), format!("{sectors}\n")).unwrap();
        fs::write(dir.join("removable"), "0\n").unwrap();
        if let Some(w) = wwid {
            fs::write(dir.join("device").join("wwid"), format!("{w}\n")).unwrap();
        }
    }

    // -------------------------------------------------------------------------
    // should_skip_device tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_should_skip_virtual_devices() {
        for name in ["loop0", "ram1", "dm-0", "zram0", "sr0", "fd0"] {
            assert!(should_skip_device(name), "{name} should be skipped");
        }
    }

    #[test]
    fn test_should_not_skip_real_devices() {
        for name in ["sda", "sdb", "nvme0n1", "mmcblk0", "vda"] {
            assert!(!should_skip_device(name), "{name} should be kept");
        }
    }

    // -------------------------------------------------------------------------
    // identity tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_identity_prefers_wwn() {
        let links = vec![
            "ata-Samsung_SSD_870_S5Y1".to_string(),
            "wwn-0x5002538f4120abcd".to_string(),
        ];
        assert_eq!(
            identity_from_by_id(&links).as_deref(),
            Some("wwn-0x5002538f4120abcd")
        );
    }

    #[test]
    fn test_identity_falls_back_to_usb() {
        let links = vec!["usb-SanDisk_Ultra_4C530001-0:0".to_string()];
        assert_eq!(
            identity_from_by_id(&links).as_deref(),
            Some("usb-SanDisk_Ultra_4C530001-0:0")
        );
    }

    #[test]
    fn test_identity_none_for_unknown_links() {
        let links = vec!["dm-name-root".to_string()];
        assert!(identity_from_by_id(&links).is_none());
        assert!(identity_from_by_id(&[]).is_none());
    }

    #[test]
    fn test_partition_links_detected() {
        assert!(is_partition_link("usb-SanDisk_Ultra-0:0-part1"));
        assert!(is_partition_link("wwn-0x5000-part12"));
        assert!(!is_partition_link("usb-SanDisk_Ultra-0:0"));
        assert!(!is_partition_link("nvme-part-number-x"));
    }

    // -------------------------------------------------------------------------
    // Fake sysfs tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_list_from_fake_sysfs() {
        let root = TempDir::new().unwrap();
        let sys_block = root.path().join("block");
        let by_id = root.path().join("by-id");
        fs::create_dir_all(&by_id).unwrap();

        fake_disk(&sys_block, "sda", 2048, Some("naa.5000c500a1b2c3d4"));
        fake_disk(&sys_block, "sdb", 4096, None);
        fake_disk(&sys_block, "loop0", 100, Some("loop-wwid"));

        symlink("../../sdb", by_id.join("usb-Generic_Flash_0001-0:0")).unwrap();
        symlink("../../sdb1", by_id.join("usb-Generic_Flash_0001-0:0-part1")).unwrap();

        let devices = list_block_devices_in(&sys_block, &by_id).unwrap();
        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].name, "sda");
        assert_eq!(devices[0].size, 2048 * 512);
        assert_eq!(devices[0].wwid.as_deref(), Some("naa.5000c500a1b2c3d4"));
        assert_eq!(devices[0].stable_path, None);

        assert_eq!(devices[1].path, "/dev/sdb");
        assert_eq!(
            devices[1].wwid.as_deref(),
            Some("usb-Generic_Flash_0001-0:0")
        );
        assert_eq!(devices[1].drive_type, DriveType::Usb);
        assert_eq!(
            devices[1].stable_path,
            Some(
                by_id
                    .join("usb-Generic_Flash_0001-0:0")
                    .to_string_lossy()
                    .to_string()
            )
        );
    }

    #[test]
    fn test_stable_path_prefers_wwn_link() {
        let root = TempDir::new().unwrap();
        let sys_block = root.path().join("block");
        let by_id = root.path().join("by-id");
        fs::create_dir_all(&by_id).unwrap();

        fake_disk(&sys_block, "sdc", 8192, Some("naa.5000c500a1b2c3d4"));
        symlink("../../sdc", by_id.join("ata-WDC_WD10EZEX_WD-1234")).unwrap();
        symlink("../../sdc", by_id.join("wwn-0x5000c500a1b2c3d4")).unwrap();

        let devices = list_block_devices_in(&sys_block, &by_id).unwrap();
        assert_eq!(
            devices[0].stable_path.as_deref(),
            by_id.join("wwn-0x5000c500a1b2c3d4").to_str()
        );
    }

    #[test]
    fn test_nvme_top_level_wwid() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("nvme0n1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("wwid"), "eui.0025388b71b2a1c3\n").unwrap();

        assert_eq!(
            read_sysfs_wwid(&dir).as_deref(),
            Some("eui.0025388b71b2a1c3")
        );
    }

    #[test]
    fn test_missing_sys_block() {
        let root = TempDir::new().unwrap();
        let result = list_block_devices_in(&root.path().join("absent"), root.path());
        assert!(matches!(result, Err(DetectError::EnumerationFailed(_))));
    }

    #[test]
    fn test_detect_drive_type_by_name() {
        let nowhere = Path::new("/nonexistent");
        assert_eq!(detect_drive_type("nvme0n1", nowhere, &[]), DriveType::Nvme);
        assert_eq!(detect_drive_type("mmcblk0", nowhere, &[]), DriveType::SdCard);
        assert_eq!(detect_drive_type("sda", nowhere, &[]), DriveType::Other);
    }

    #[test]
    #[ignore = "requires actual Linux system, run with: cargo test -- --ignored"]
    fn test_list_block_devices_real() {
        let devices = list_block_devices();
        assert!(devices.is_ok(), "Should be able to list block devices");
    }
}
