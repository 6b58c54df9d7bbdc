//! Linux platform implementation
//!
//! Partitioning and formatting shell out to `sgdisk`, `parted` and `mkfs.*`;
//! re-enumeration goes through the USB driver's sysfs bind/unbind files.

use crate::{
    ByteCopier, DdReport, DdRequest, DeviceInfo, DiskOps, PlatformError, RawDevice, Result,
};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Instant;

const PROC_MOUNTS: &str = "/proc/mounts";
const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";
const USB_DRIVER_DIR: &str = "/sys/bus/usb/drivers/usb";

/// Exit status `umount` uses when the target is not mounted
const UMOUNT_NOT_MOUNTED: i32 = 32;

/// Linux platform implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxPlatform;

impl DiskOps for LinuxPlatform {
    fn unmount_device(&self, path: &str) -> Result<()> {
        unmount_linux_device(path)
    }

    fn delete_partitions(&self, path: &str) -> Result<()> {
        run_checked("sgdisk", &["--zap-all", path]).map(|_| ())
    }

    fn create_partition(&self, path: &str, start_bytes: u64, size_bytes: u64) -> Result<()> {
        let args = parted_args(path, start_bytes, size_bytes);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("parted", &args).map(|_| ())
    }

    fn rebind_device(&self, path: &str) -> Result<()> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PlatformError::DeviceNotFound(path.to_string()))?;

        let device_link = Path::new("/sys/block").join(name).join("device");
        let usb_id = device_link
            .canonicalize()
            .ok()
            .and_then(|p| find_usb_device(&p));

        match usb_id {
            Some(id) => {
                tracing::info!("Rebinding USB device {} ({})", id, path);
                write_sysfs(&Path::new(USB_DRIVER_DIR).join("unbind"), &id)?;
                write_sysfs(&Path::new(USB_DRIVER_DIR).join("bind"), &id)
            }
            None => {
                tracing::info!("{} is not on USB, re-reading partition table", path);
                run_checked("partprobe", &[path]).map(|_| ())
            }
        }
    }

    fn format_filesystem(&self, partition_path: &str, fstype: &str) -> Result<()> {
        let program = format!("mkfs.{fstype}");
        let args = mkfs_args(fstype, partition_path);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked(&program, &args).map(|_| ())
    }

    fn device_size(&self, path: &str) -> Result<u64> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        get_device_size(&file, path)
    }

    fn sync_all(&self) -> Result<()> {
        run_checked("sync", &[]).map(|_| ())
    }

    fn drop_caches(&self) -> Result<()> {
        std::fs::write(DROP_CACHES, "3\n").map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                PlatformError::PermissionDenied(format!("Cannot write {DROP_CACHES}: {e}"))
            } else {
                PlatformError::Io(e)
            }
        })
    }

    fn open_device(&self, path: &str) -> Result<Box<dyn RawDevice>> {
        LinuxDevice::open(path).map(|d| Box::new(d) as Box<dyn RawDevice>)
    }

    fn is_block_device(&self, path: &str) -> bool {
        std::fs::metadata(path).is_ok_and(|m| m.file_type().is_block_device())
    }
}

impl ByteCopier for LinuxPlatform {
    fn copy(&self, request: &DdRequest) -> Result<DdReport> {
        tracing::debug!("Running {}", request.command_line());

        let start = Instant::now();
        let mut child = Command::new("dd")
            .args(request.args())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error("dd", &e))?;

        // dd rewrites its progress line with '\r'; split on both separators
        let mut transcript = String::new();
        if let Some(stderr) = child.stderr.take() {
            for chunk in BufReader::new(stderr).split(b'\r') {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        reap(&mut child);
                        return Err(PlatformError::Io(e));
                    }
                };
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    tracing::debug!("dd: {}", line.trim());
                }
                transcript.push_str(&text);
                transcript.push('\n');
            }
        }

        let status = child.wait()?;
        let elapsed = start.elapsed();

        if !status.success() {
            return Err(PlatformError::CommandFailed(format!(
                "dd exited with {:?}: {}",
                status.code(),
                last_line(&transcript)
            )));
        }

        let (transferred_bytes, _) = crate::parse_dd_summary(&transcript).ok_or_else(|| {
            PlatformError::CommandFailed(format!(
                "could not read dd summary: {}",
                last_line(&transcript)
            ))
        })?;

        Ok(DdReport {
            transferred_bytes,
            elapsed,
        })
    }
}

/// Linux device wrapper for positional writes
pub struct LinuxDevice {
    file: File,
    info: DeviceInfo,
}

impl LinuxDevice {
    /// Open a device (or regular file) for reading and writing
    pub fn open(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(PlatformError::DeviceNotFound(path.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;

        let size = get_device_size(&file, path)?;

        Ok(Self {
            file,
            info: DeviceInfo {
                path: path.to_string(),
                size,
            },
        })
    }
}

impl RawDevice for LinuxDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(PlatformError::Io)
    }
}

fn open_error(path: &str, e: std::io::Error) -> PlatformError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        PlatformError::PermissionDenied(format!("Cannot open {path}: {e}. Try running with sudo."))
    } else if e.raw_os_error() == Some(libc::EBUSY) {
        PlatformError::DeviceBusy(format!("{path} is busy. Try unmounting first."))
    } else if e.kind() == std::io::ErrorKind::NotFound {
        PlatformError::DeviceNotFound(path.to_string())
    } else {
        PlatformError::Io(e)
    }
}

/// Get device size using ioctl, falling back to the end offset for regular files
fn get_device_size(file: &File, path: &str) -> Result<u64> {
    // Cast via u32 to handle the sign bit correctly on platforms where Ioctl is i32
    const BLKGETSIZE64: libc::Ioctl = 0x8008_1272_u32 as libc::Ioctl;

    let fd = file.as_raw_fd();
    let mut size: u64 = 0;
    // SAFETY: ioctl with BLKGETSIZE64 writes a u64 to the provided pointer.
    // We pass a valid mutable reference to a u64, and fd is valid.
    #[allow(unsafe_code)]
    let result = unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut size) };

    if result == 0 && size > 0 {
        return Ok(size);
    }

    let mut handle = file;
    handle
        .seek(SeekFrom::End(0))
        .map_err(|e| PlatformError::Io(std::io::Error::other(format!("Failed to get size of {path}: {e}"))))
}

/// Whether a mount source lives on the given whole device
///
/// `/dev/sdb1` and `/dev/nvme0n1p2` are on `/dev/sdb` and `/dev/nvme0n1`;
/// `/dev/sdba1` is not on `/dev/sdb`.
pub(crate) fn is_on_device(mount_device: &str, device_path: &str) -> bool {
    let Some(rest) = mount_device.strip_prefix(device_path) else {
        return false;
    };
    let rest = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit())
}

/// Mount points of every filesystem on the device, deepest first
pub(crate) fn mounts_on_device(mounts: &str, device_path: &str) -> Vec<String> {
    let mut points: Vec<String> = mounts
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount_point = parts.next()?;
            is_on_device(device, device_path).then(|| mount_point.to_string())
        })
        .collect();
    points.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
    points
}

/// Unmount all filesystems on a device
fn unmount_linux_device(device_path: &str) -> Result<()> {
    let mounts = std::fs::read_to_string(PROC_MOUNTS)
        .map_err(|e| PlatformError::UnmountFailed(format!("Cannot read {PROC_MOUNTS}: {e}")))?;

    let points = mounts_on_device(&mounts, device_path);
    if points.is_empty() {
        tracing::debug!("Nothing mounted on {}", device_path);
        return Ok(());
    }

    for mount_point in &points {
        tracing::debug!("Unmounting {} from {}", device_path, mount_point);

        let output = Command::new("umount")
            .arg(mount_point)
            .output()
            .map_err(|e| PlatformError::UnmountFailed(format!("Failed to run umount: {e}")))?;

        if !output.status.success() && output.status.code() != Some(UMOUNT_NOT_MOUNTED) {
            return Err(PlatformError::UnmountFailed(format!(
                "Failed to unmount {}: {}",
                mount_point,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }

    // Give the kernel time to process
    std::thread::sleep(std::time::Duration::from_millis(100));
    Ok(())
}

/// `parted` arguments creating an msdos label with one primary partition
pub(crate) fn parted_args(path: &str, start_bytes: u64, size_bytes: u64) -> Vec<String> {
    let end = start_bytes + size_bytes - 1;
    vec![
        "--script".to_string(),
        path.to_string(),
        "mklabel".to_string(),
        "msdos".to_string(),
        "mkpart".to_string(),
        "primary".to_string(),
        format!("{start_bytes}B"),
        format!("{end}B"),
    ]
}

/// `mkfs.<fstype>` arguments, forcing creation where the tool needs it
pub(crate) fn mkfs_args(fstype: &str, partition_path: &str) -> Vec<String> {
    let force = match fstype {
        "ext2" | "ext3" | "ext4" => Some("-F"),
        "xfs" | "btrfs" | "f2fs" => Some("-f"),
        _ => None,
    };
    force
        .into_iter()
        .map(str::to_string)
        .chain(std::iter::once(partition_path.to_string()))
        .collect()
}

/// Find the USB device node above a block device in the sysfs hierarchy
///
/// USB device directories carry an `idVendor` attribute; interface
/// directories (`2-1:1.0`) are skipped because bind/unbind takes the device id.
pub(crate) fn find_usb_device(device_path: &Path) -> Option<String> {
    let mut current: PathBuf = device_path.to_path_buf();

    // Limit traversal depth to avoid infinite loops
    for _ in 0..15 {
        let name = current.file_name()?.to_string_lossy().to_string();
        if current.join("idVendor").exists() && !name.contains(':') {
            return Some(name);
        }

        match current.parent() {
            Some(parent) if parent != Path::new("/sys") && parent != Path::new("/") => {
                current = parent.to_path_buf();
            }
            _ => break,
        }
    }

    None
}

fn write_sysfs(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            PlatformError::PermissionDenied(format!("Cannot write {}: {e}", path.display()))
        } else {
            PlatformError::Io(e)
        }
    })
}

fn spawn_error(program: &str, e: &std::io::Error) -> PlatformError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PlatformError::CommandFailed(format!("{program} not found in PATH"))
    } else {
        PlatformError::CommandFailed(format!("{program} failed to start: {e}"))
    }
}

fn run_checked(program: &str, args: &[&str]) -> Result<Output> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| spawn_error(program, &e))?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(PlatformError::CommandFailed(format!(
            "{} exited with {:?}: {}",
            program,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Stop a child whose output can no longer be read and collect its status
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("dd already exited: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to wait for dd: {}", e);
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("")
}

// ============================================================================
// UNIT TESTS
// ============================================================================
