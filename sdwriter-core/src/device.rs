use crate::error::Result;
use std::fmt;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// A removable disk that qualified during a scan.
///
/// Descriptors are produced fresh by every call to
/// [`DeviceEnumerator::enumerate`] and are never cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// The raw device node (e.g., `/dev/sdb`, `/dev/rdisk4` or `\\.\PhysicalDrive2`).
    pub path: PathBuf,
    /// The capacity of the inserted medium in bytes.
    pub size_bytes: u64,
    /// Best-effort vendor string, empty when the platform does not report one.
    pub vendor: String,
    /// Best-effort product string, empty when the platform does not report one.
    pub product: String,
    /// Volumes that have to be released before raw access: mount points on
    /// Linux, the whole-disk node on macOS, the drive letter on Windows.
    pub volumes: Vec<PathBuf>,
}

impl DeviceDescriptor {
    pub fn size_mb(&self) -> u64 {
        self.size_bytes / 1_000_000
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = [self.vendor.as_str(), self.product.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        write!(f, "{} - ", self.path.display())?;
        if !name.is_empty() {
            write!(f, "{name}, ")?;
        }
        write!(f, "size {} MB", self.size_mb())
    }
}

/// How a disk is attached to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Usb,
    /// Attached some other way (SATA, NVMe, a built-in card slot, ...).
    Other(String),
    /// The platform cannot tell.
    Unknown,
}

/// A disk as reported by the OS, before the removable-USB policy is applied.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub descriptor: DeviceDescriptor,
    pub removable: bool,
    pub transport: Transport,
}

impl Candidate {
    /// Whether this disk may be offered as a write target.
    ///
    /// Only removable disks with media inserted qualify, and disks known to
    /// sit on a non-USB transport are rejected.
    pub fn qualifies(&self) -> bool {
        let name = self.descriptor.path.display();
        if !self.removable {
            debug!(device = %name, "skipping: not removable");
            return false;
        }
        if self.descriptor.size_bytes == 0 {
            debug!(device = %name, "skipping: no medium inserted");
            return false;
        }
        if let Transport::Other(bus) = &self.transport {
            debug!(device = %name, bus = %bus, "skipping: not attached via USB");
            return false;
        }
        true
    }
}

/// Applies the candidate policy and keeps at most `max_count` devices, in
/// the order the platform reported them.
pub fn qualifying<I>(candidates: I, max_count: usize) -> Vec<DeviceDescriptor>
where
    I: IntoIterator<Item = Candidate>,
{
    candidates
        .into_iter()
        .filter(Candidate::qualifies)
        .take(max_count)
        .map(|c| c.descriptor)
        .collect()
}

/// A platform's way of discovering removable USB disks.
pub trait DeviceEnumerator {
    /// Scans the system and returns up to `max_count` qualifying devices.
    ///
    /// An empty list is not an error. An error means the platform's
    /// enumeration service itself is unavailable.
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>>;

    /// Releases whatever the OS holds on `device` (mounted volumes, volume
    /// locks) so that it can be opened for raw access.
    ///
    /// This is best effort; the raw open decides whether access is granted.
    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        let _ = device;
        Ok(())
    }
}

impl<T: DeviceEnumerator + ?Sized> DeviceEnumerator for &T {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        (**self).enumerate(max_count)
    }

    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        (**self).prepare(device)
    }
}

impl<T: DeviceEnumerator + ?Sized> DeviceEnumerator for Box<T> {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        (**self).enumerate(max_count)
    }

    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        (**self).prepare(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(path: &str, size_bytes: u64, removable: bool, transport: Transport) -> Candidate {
        Candidate {
            descriptor: DeviceDescriptor {
                path: PathBuf::from(path),
                size_bytes,
                vendor: "Generic".into(),
                product: "STORAGE DEVICE".into(),
                volumes: Vec::new(),
            },
            removable,
            transport,
        }
    }

    #[test]
    fn empty_reader_never_qualifies() {
        assert!(!disk("/dev/sdb", 0, true, Transport::Usb).qualifies());
    }

    #[test]
    fn fixed_disk_never_qualifies() {
        assert!(!disk("/dev/sda", 500_000_000_000, false, Transport::Usb).qualifies());
    }

    #[test]
    fn non_usb_transport_is_rejected_but_unknown_is_not() {
        let sata = disk("/dev/sdc", 1 << 30, true, Transport::Other("sata".into()));
        let unknown = disk("/dev/sdd", 1 << 30, true, Transport::Unknown);
        assert!(!sata.qualifies());
        assert!(unknown.qualifies());
    }

    #[test]
    fn qualifying_keeps_platform_order_and_bounds_output() {
        let found = qualifying(
            vec![
                disk("/dev/sdc", 8_000_000_000, true, Transport::Usb),
                disk("/dev/sdb", 0, true, Transport::Usb),
                disk("/dev/sdd", 4_000_000_000, true, Transport::Usb),
                disk("/dev/sde", 2_000_000_000, true, Transport::Usb),
            ],
            2,
        );
        let paths: Vec<_> = found.iter().map(|d| d.path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("/dev/sdc"), PathBuf::from("/dev/sdd")]);
    }

    #[test]
    fn label_starts_with_the_device_path() {
        let d = disk("/dev/sdb", 15_931_539_456, true, Transport::Usb).descriptor;
        let label = d.to_string();
        assert_eq!(label, "/dev/sdb - Generic STORAGE DEVICE, size 15931 MB");
        assert_eq!(label.split(' ').next(), Some("/dev/sdb"));
    }

    #[test]
    fn label_without_vendor_or_product() {
        let mut d = disk("/dev/sdb", 2_000_000, true, Transport::Usb).descriptor;
        d.vendor.clear();
        d.product.clear();
        assert_eq!(d.to_string(), "/dev/sdb - size 2 MB");
    }
}
