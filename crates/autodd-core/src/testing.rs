//! In-memory host used by the unit tests

use autodd_detect::{BlockDevice, BlockDeviceSource, DeviceRef};
use autodd_platform::{
    ByteCopier, DdReport, DdRequest, DeviceInfo, DiskOps, PlatformError, RawDevice,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Writes seen by every device opened from a [`FakeHost`]: (path, offset, len)
pub type WriteLog = Arc<Mutex<Vec<(String, u64, usize)>>>;

/// Whole-device paths that currently carry a partition table
pub type PartitionTables = Arc<Mutex<HashSet<String>>>;

pub struct MemDevice {
    info: DeviceInfo,
    log: WriteLog,
    tables: PartitionTables,
}

impl RawDevice for MemDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> autodd_platform::Result<()> {
        if offset + data.len() as u64 > self.info.size {
            return Err(PlatformError::Io(std::io::Error::other("write past end")));
        }
        self.log
            .lock()
            .unwrap()
            .push((self.info.path.clone(), offset, data.len()));
        // the table lives in the first sector
        if offset == 0 {
            self.tables.lock().unwrap().remove(&self.info.path);
        }
        Ok(())
    }

    fn sync(&self) -> autodd_platform::Result<()> {
        Ok(())
    }
}

/// Devices, disk operations and `dd` all backed by memory
pub struct FakeHost {
    pub devices: RefCell<Vec<BlockDevice>>,
    pub calls: RefCell<Vec<String>>,
    pub writes: WriteLog,
    pub tables: PartitionTables,
    /// Paths that never show up as device nodes
    pub hidden: HashSet<String>,
    pub sizes: HashMap<String, u64>,
    /// Operation name that fails, and how many more times it fails
    pub fail: RefCell<Option<(&'static str, u32)>>,
    /// Device renames applied on rebind: old name -> new name ("" removes it)
    pub renames: HashMap<String, String>,
    pub drop_ok: bool,
    /// Simulated seconds per block, by block size
    pub latency: Box<dyn Fn(u64) -> f64>,
    pub requests: RefCell<Vec<DdRequest>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            devices: RefCell::new(vec![
                BlockDevice::new("nvme0n1")
                    .with_wwid("eui.source")
                    .with_size(64 * GIB)
                    .with_stable_path("/dev/disk/by-id/nvme-eui.source"),
                BlockDevice::new("sdb")
                    .with_wwid("usb-Flash_0001")
                    .with_size(32 * GIB)
                    .with_stable_path("/dev/disk/by-id/usb-Flash_0001"),
            ]),
            calls: RefCell::new(Vec::new()),
            writes: Arc::new(Mutex::new(Vec::new())),
            tables: Arc::new(Mutex::new(HashSet::new())),
            hidden: HashSet::new(),
            sizes: HashMap::from([
                ("/dev/nvme0n1".to_string(), 64 * GIB),
                ("/dev/sdb".to_string(), 32 * GIB),
                ("/dev/sdc".to_string(), 32 * GIB),
            ]),
            fail: RefCell::new(None),
            renames: HashMap::new(),
            drop_ok: true,
            latency: Box::new(|_| 0.001),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(self, op: &'static str, times: u32) -> Self {
        *self.fail.borrow_mut() = Some((op, times));
        self
    }

    pub fn renaming(mut self, from: &str, to: &str) -> Self {
        self.renames.insert(from.to_string(), to.to_string());
        self
    }

    pub fn hiding(mut self, path: &str) -> Self {
        self.hidden.insert(path.to_string());
        self
    }

    pub fn is_partitioned(&self, path: &str) -> bool {
        self.tables.lock().unwrap().contains(path)
    }

    pub fn with_latency(mut self, latency: impl Fn(u64) -> f64 + 'static) -> Self {
        self.latency = Box::new(latency);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }

    fn record(&self, op: &'static str, detail: &str) -> autodd_platform::Result<()> {
        self.calls.borrow_mut().push(format!("{op} {detail}"));
        let mut fail = self.fail.borrow_mut();
        if let Some((name, remaining)) = fail.as_mut() {
            if *name == op && *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::CommandFailed(format!("{op} failed")));
            }
        }
        Ok(())
    }
}

impl BlockDeviceSource for FakeHost {
    fn block_devices(&self) -> autodd_detect::Result<Vec<BlockDevice>> {
        Ok(self.devices.borrow().clone())
    }
}

impl DiskOps for FakeHost {
    fn unmount_device(&self, path: &str) -> autodd_platform::Result<()> {
        self.record("unmount", path)
    }

    fn delete_partitions(&self, path: &str) -> autodd_platform::Result<()> {
        self.record("delete_partitions", path)?;
        self.tables.lock().unwrap().remove(path);
        Ok(())
    }

    fn create_partition(&self, path: &str, start: u64, size: u64) -> autodd_platform::Result<()> {
        self.record("create_partition", &format!("{path} {start} {size}"))?;
        self.tables.lock().unwrap().insert(path.to_string());
        Ok(())
    }

    fn rebind_device(&self, path: &str) -> autodd_platform::Result<()> {
        self.record("rebind", path)?;
        let mut devices = self.devices.borrow_mut();
        // an empty new name means the device never comes back
        devices.retain(|d| self.renames.get(&d.name).is_none_or(|n| !n.is_empty()));
        for device in devices.iter_mut() {
            if let Some(new_name) = self.renames.get(&device.name) {
                let new_path = format!("/dev/{new_name}");
                let mut tables = self.tables.lock().unwrap();
                if tables.remove(&device.path) {
                    tables.insert(new_path.clone());
                }
                *device = BlockDevice {
                    name: new_name.clone(),
                    path: new_path,
                    ..device.clone()
                };
            }
        }
        Ok(())
    }

    fn format_filesystem(&self, partition: &str, fstype: &str) -> autodd_platform::Result<()> {
        self.record("format", &format!("{partition} {fstype}"))
    }

    fn device_size(&self, path: &str) -> autodd_platform::Result<u64> {
        self.sizes
            .get(path)
            .copied()
            .ok_or_else(|| PlatformError::DeviceNotFound(path.to_string()))
    }

    fn sync_all(&self) -> autodd_platform::Result<()> {
        self.record("sync", "")
    }

    fn drop_caches(&self) -> autodd_platform::Result<()> {
        self.calls.borrow_mut().push("drop_caches ".to_string());
        if self.drop_ok {
            Ok(())
        } else {
            Err(PlatformError::PermissionDenied("drop_caches".to_string()))
        }
    }

    fn open_device(&self, path: &str) -> autodd_platform::Result<Box<dyn RawDevice>> {
        self.record("open", path)?;
        let size = self.device_size(path)?;
        Ok(Box::new(MemDevice {
            info: DeviceInfo {
                path: path.to_string(),
                size,
            },
            log: Arc::clone(&self.writes),
            tables: Arc::clone(&self.tables),
        }))
    }

    fn is_block_device(&self, path: &str) -> bool {
        if self.hidden.contains(path) {
            return false;
        }
        if self.devices.borrow().iter().any(|d| d.path == path) {
            return true;
        }
        // a partition node exists while its parent carries a table
        self.tables
            .lock()
            .unwrap()
            .iter()
            .any(|parent| DeviceRef::new("", parent.as_str()).partition_path() == path)
    }
}

impl ByteCopier for FakeHost {
    fn copy(&self, request: &DdRequest) -> autodd_platform::Result<DdReport> {
        self.requests.borrow_mut().push(request.clone());
        self.record("dd", &format!("bs={}", request.block_size))?;

        let count = request.count.unwrap_or(0);
        let secs = count as f64 * (self.latency)(request.block_size);
        Ok(DdReport {
            transferred_bytes: count * request.block_size,
            elapsed: Duration::from_secs_f64(secs),
        })
    }
}
