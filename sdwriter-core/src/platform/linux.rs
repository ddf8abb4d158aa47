use crate::device::{Candidate, DeviceDescriptor, DeviceEnumerator, Transport, qualifying};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Kernel name prefixes of block devices that are never physical disks.
const VIRTUAL_PREFIXES: &[&str] = &["loop", "ram", "zram"];

/// Helper to read a sysfs attribute, trimmed.
fn read_attr(dir: &Path, file: &str) -> Option<String> {
    fs::read_to_string(dir.join(file))
        .ok()
        .map(|s| s.trim().to_string())
}

/// A mounted filesystem and the kernel name of the block device behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    /// Kernel name of the partition or disk (e.g., "sdb1").
    pub device: String,
    pub mount_point: PathBuf,
}

/// A snapshot of the mounted filesystems.
#[derive(Clone, Debug, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    /// Reads the current mounts through `sysinfo`.
    pub fn system() -> Self {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let entries = disks
            .iter()
            .filter_map(|disk| {
                let device = Path::new(disk.name()).file_name()?;
                Some(MountEntry {
                    device: device.to_string_lossy().into_owned(),
                    mount_point: disk.mount_point().to_path_buf(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Mount points of `device` itself and of its partitions. A partition
    /// shows up in sysfs as a subdirectory of its disk (`block/sdb/sdb1`).
    fn mount_points(&self, sys_dir: &Path, device: &str) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|m| {
                m.device == device
                    || (m.device.starts_with(device) && sys_dir.join(&m.device).is_dir())
            })
            .map(|m| m.mount_point.clone())
            .collect()
    }
}

/// Finds the USB device node (`usb_device` in udev terms) above a block
/// device by walking up its canonical sysfs path. USB device nodes are the
/// ones carrying an `idVendor` attribute.
fn usb_parent(sys_dir: &Path, sysfs_root: &Path) -> Option<PathBuf> {
    let real = fs::canonicalize(sys_dir).ok()?;
    let root = fs::canonicalize(sysfs_root).unwrap_or_else(|_| sysfs_root.to_path_buf());

    real.ancestors()
        .skip(1)
        .take_while(|p| p.starts_with(&root) && *p != root)
        .find(|p| p.join("idVendor").is_file())
        .map(Path::to_path_buf)
}

/// A rough name for a non-USB bus, for log messages only.
fn bus_name(sys_dir: &Path) -> String {
    let real = fs::canonicalize(sys_dir).unwrap_or_else(|_| sys_dir.to_path_buf());
    let real = real.to_string_lossy();
    ["nvme", "mmc", "ata", "virtio", "scsi"]
        .iter()
        .find(|bus| real.contains(*bus))
        .map_or("other", |bus| *bus)
        .to_string()
}

/// Discovers removable USB disks through sysfs.
///
/// For every entry of `/sys/block`:
/// 1.  Skip virtual devices (`loop`, `ram`, `zram`) and the disk holding `/`.
/// 2.  Read the `removable` flag and the `size` in 512-byte sectors.
/// 3.  Look for a USB device node among the sysfs ancestors. Its
///     `manufacturer` and `product` attributes describe the disk.
///
/// The qualification policy is then applied by [`qualifying`].
pub struct LinuxEnumerator {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    mounts: Option<MountTable>,
}

impl LinuxEnumerator {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            mounts: None,
        }
    }

    /// Scans an alternative sysfs tree against a fixed mount table.
    pub fn with_roots(
        sysfs_root: impl Into<PathBuf>,
        dev_root: impl Into<PathBuf>,
        mounts: MountTable,
    ) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            mounts: Some(mounts),
        }
    }

    fn scan(&self) -> Result<Vec<Candidate>> {
        let block_dir = self.sysfs_root.join("block");
        let entries = fs::read_dir(&block_dir).map_err(Error::Enumeration)?;
        let mounts = match &self.mounts {
            Some(table) => table.clone(),
            None => MountTable::system(),
        };

        let mut candidates = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
                continue;
            }

            let sys_dir = block_dir.join(&name);
            let volumes = mounts.mount_points(&sys_dir, &name);
            if volumes.iter().any(|v| v == Path::new("/")) {
                debug!(device = %name, "skipping: holds the root filesystem");
                continue;
            }

            let removable = read_attr(&sys_dir, "removable").as_deref() == Some("1");
            let sectors = read_attr(&sys_dir, "size")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);

            let (transport, vendor, product) = match usb_parent(&sys_dir, &self.sysfs_root) {
                Some(usb) => (
                    Transport::Usb,
                    read_attr(&usb, "manufacturer").unwrap_or_default(),
                    read_attr(&usb, "product").unwrap_or_default(),
                ),
                None => (Transport::Other(bus_name(&sys_dir)), String::new(), String::new()),
            };

            candidates.push(Candidate {
                descriptor: DeviceDescriptor {
                    path: self.dev_root.join(&name),
                    size_bytes: sectors.saturating_mul(512),
                    vendor,
                    product,
                    volumes,
                },
                removable,
                transport,
            });
        }

        Ok(candidates)
    }
}

impl Default for LinuxEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEnumerator for LinuxEnumerator {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        Ok(qualifying(self.scan()?, max_count))
    }

    /// Unmounts every mounted partition of the device.
    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        let mut result = Ok(());
        for volume in &device.volumes {
            match nix::mount::umount(volume.as_path()) {
                Ok(()) => debug!(volume = %volume.display(), "unmounted"),
                Err(errno) => {
                    warn!(volume = %volume.display(), %errno, "failed to unmount");
                    if result.is_ok() {
                        result = Err(io::Error::from(errno));
                    }
                }
            }
        }
        result
    }
}
