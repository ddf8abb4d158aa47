//! Platform differences in how a raw device is opened.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(target_os = "linux")]
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Opens a target device for reading and writing.
///
/// On Linux, block devices are opened with `O_EXCL`, which the kernel
/// refuses with `EBUSY` while any partition of the disk is mounted.
/// Regular files (used as stand-in devices) are opened plainly.
#[cfg(target_os = "linux")]
pub(crate) fn open_raw_device(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};

    let is_block = std::fs::metadata(path)?.file_type().is_block_device();
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if is_block {
        options.custom_flags(libc::O_EXCL);
    }
    options.open(path)
}

/// Opens a target device for reading and writing, sharing it with the
/// volume handle that holds the lock.
#[cfg(windows)]
pub(crate) fn open_raw_device(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_SHARE_READ: u32 = 0x1;
    const FILE_SHARE_WRITE: u32 = 0x2;

    OpenOptions::new()
        .read(true)
        .write(true)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
        .open(path)
}

#[cfg(not(any(target_os = "linux", windows)))]
pub(crate) fn open_raw_device(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// The capacity of `file` if it is a block device.
#[cfg(target_os = "linux")]
pub(crate) fn block_device_size(file: &File) -> io::Result<Option<u64>> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::io::AsRawFd;

    if !file.metadata()?.file_type().is_block_device() {
        return Ok(None);
    }
    let mut size: u64 = 0;
    unsafe {
        blkgetsize64(file.as_raw_fd(), &mut size).map_err(io::Error::from)?;
    }
    Ok(Some(size))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn block_device_size(_file: &File) -> io::Result<Option<u64>> {
    Ok(None)
}
