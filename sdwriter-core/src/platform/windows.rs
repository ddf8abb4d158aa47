use crate::device::{Candidate, DeviceDescriptor, DeviceEnumerator, Transport, qualifying};
use crate::error::{Error, Result};
use std::ffi::{OsStr, c_void};
use std::io;
use std::mem::{size_of, zeroed};
use std::os::windows::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr::{null, null_mut};
use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, GetDriveTypeW, GetLogicalDrives,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::System::Ioctl::{
    DISK_GEOMETRY_EX, FSCTL_DISMOUNT_VOLUME, FSCTL_LOCK_VOLUME, IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
    IOCTL_STORAGE_CHECK_VERIFY, IOCTL_STORAGE_CHECK_VERIFY2, IOCTL_STORAGE_GET_DEVICE_NUMBER,
    IOCTL_STORAGE_QUERY_PROPERTY, PropertyStandardQuery, STORAGE_DEVICE_DESCRIPTOR,
    STORAGE_DEVICE_NUMBER, STORAGE_PROPERTY_QUERY, StorageDeviceProperty,
};

const DRIVE_REMOVABLE: u32 = 2;
const BUS_TYPE_USB: i32 = 7;
const FILE_READ_DATA: u32 = 0x0001;
const FILE_READ_ATTRIBUTES: u32 = 0x0080;
const GENERIC_WRITE: u32 = 0x4000_0000;

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// An open Win32 handle, closed on drop.
struct Handle(HANDLE);

impl Handle {
    fn open(path: &str, access: u32) -> io::Result<Self> {
        let name = wide(path);
        let h = unsafe {
            CreateFileW(
                name.as_ptr(),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                null(),
                OPEN_EXISTING,
                0,
                0,
            )
        };
        if h == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(h))
    }

    /// Issues a control code with no input and a raw output buffer.
    fn control(&self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<u32> {
        let mut returned = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                self.0,
                code,
                if input.is_empty() { null() } else { input.as_ptr().cast::<c_void>() },
                input.len() as u32,
                if output.is_empty() { null_mut() } else { output.as_mut_ptr().cast::<c_void>() },
                output.len() as u32,
                &mut returned,
                null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(returned)
    }

    /// Issues a control code whose output is a plain-old-data struct.
    fn query<T>(&self, code: u32) -> io::Result<T> {
        let mut out: T = unsafe { zeroed() };
        let buf = unsafe {
            std::slice::from_raw_parts_mut((&mut out as *mut T).cast::<u8>(), size_of::<T>())
        };
        self.control(code, &[], buf)?;
        Ok(out)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Multi-card readers report "removable" even with no card inserted, so ask
/// the driver whether there is media. CHECK_VERIFY2 fails on some older
/// drivers; the slower CHECK_VERIFY needs read access.
fn has_media(h: &Handle, volume: &str) -> bool {
    if h.control(IOCTL_STORAGE_CHECK_VERIFY2, &[], &mut []).is_ok() {
        return true;
    }
    Handle::open(volume, FILE_READ_DATA)
        .and_then(|g| g.control(IOCTL_STORAGE_CHECK_VERIFY, &[], &mut []))
        .is_ok()
}

/// A NUL-terminated ASCII string at `offset` in a property buffer.
fn descriptor_string(buf: &[u8], offset: u32) -> String {
    let offset = offset as usize;
    if offset == 0 || offset >= buf.len() {
        return String::new();
    }
    let bytes = &buf[offset..];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Bus type, vendor and product of the disk behind a volume.
fn storage_properties(h: &Handle) -> io::Result<(i32, String, String)> {
    let mut query: STORAGE_PROPERTY_QUERY = unsafe { zeroed() };
    query.PropertyId = StorageDeviceProperty;
    query.QueryType = PropertyStandardQuery;
    let input = unsafe {
        std::slice::from_raw_parts(
            (&query as *const STORAGE_PROPERTY_QUERY).cast::<u8>(),
            size_of::<STORAGE_PROPERTY_QUERY>(),
        )
    };

    let mut buf = vec![0u8; size_of::<STORAGE_DEVICE_DESCRIPTOR>() + 512];
    h.control(IOCTL_STORAGE_QUERY_PROPERTY, input, &mut buf)?;
    let sd = unsafe { buf.as_ptr().cast::<STORAGE_DEVICE_DESCRIPTOR>().read_unaligned() };

    Ok((
        sd.BusType as i32,
        descriptor_string(&buf, sd.VendorIdOffset),
        descriptor_string(&buf, sd.ProductIdOffset),
    ))
}

fn probe(letter: char) -> io::Result<Option<Candidate>> {
    let root = wide(&format!("{letter}:\\"));
    if unsafe { GetDriveTypeW(root.as_ptr()) } != DRIVE_REMOVABLE {
        return Ok(None);
    }

    let volume = format!("\\\\.\\{letter}:");
    let h = Handle::open(&volume, FILE_READ_ATTRIBUTES)?;
    let media = has_media(&h, &volume);

    let (bus, vendor, product) = storage_properties(&h)?;
    let number: STORAGE_DEVICE_NUMBER = h.query(IOCTL_STORAGE_GET_DEVICE_NUMBER)?;
    let size_bytes = if media {
        let geometry: DISK_GEOMETRY_EX = h.query(IOCTL_DISK_GET_DRIVE_GEOMETRY_EX)?;
        geometry.DiskSize.max(0) as u64
    } else {
        0
    };

    Ok(Some(Candidate {
        descriptor: DeviceDescriptor {
            path: PathBuf::from(format!("\\\\.\\PhysicalDrive{}", number.DeviceNumber)),
            size_bytes,
            vendor,
            product,
            volumes: vec![PathBuf::from(volume)],
        },
        removable: true,
        transport: if bus == BUS_TYPE_USB {
            Transport::Usb
        } else {
            Transport::Other(format!("bus type {bus}"))
        },
    }))
}

/// Discovers removable USB disks through drive letters.
///
/// Every logical drive of type `DRIVE_REMOVABLE` is queried for media
/// presence, bus type, physical drive number and geometry.
pub struct WindowsEnumerator;

impl DeviceEnumerator for WindowsEnumerator {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        let mask = unsafe { GetLogicalDrives() };
        if mask == 0 {
            return Err(Error::Enumeration(io::Error::last_os_error()));
        }

        let mut candidates = Vec::new();
        for (i, letter) in ('A'..='Z').enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            match probe(letter) {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) => debug!(drive = %letter, error = %e, "skipping"),
            }
        }

        Ok(qualifying(candidates, max_count))
    }

    /// Locks and dismounts the drive-letter volume.
    ///
    /// The volume handle is deliberately leaked: closing it would release
    /// the lock, which has to be held until the process exits.
    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        for volume in &device.volumes {
            let volume = volume.to_string_lossy();
            let h = Handle::open(&volume, GENERIC_WRITE)?;
            h.control(FSCTL_LOCK_VOLUME, &[], &mut [])?;
            h.control(FSCTL_DISMOUNT_VOLUME, &[], &mut [])?;
            debug!(volume = %volume, "locked and dismounted");
            std::mem::forget(h);
        }
        Ok(())
    }
}
