use super::diskutil;
use crate::device::{DeviceDescriptor, DeviceEnumerator, qualifying};
use crate::error::{Error, Result};
use std::io;
use std::process::Command;
use tracing::debug;

fn diskutil(args: &[&str]) -> io::Result<String> {
    let output = Command::new("diskutil").args(args).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "diskutil {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Discovers removable USB disks through `diskutil`.
///
/// `diskutil list external physical` names the whole disks, and
/// `diskutil info` on each of them reports removability, protocol and size.
pub struct MacosEnumerator;

impl DeviceEnumerator for MacosEnumerator {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        let list = diskutil(&["list", "external", "physical"]).map_err(Error::Enumeration)?;

        let mut candidates = Vec::new();
        for disk in diskutil::whole_disks(&list) {
            match diskutil(&["info", &disk]) {
                Ok(info) => candidates.push(diskutil::parse_info(&disk, &info)),
                Err(e) => debug!(device = %disk, error = %e, "skipping: no disk info"),
            }
        }

        Ok(qualifying(candidates, max_count))
    }

    /// Unmounts all volumes of the disk, the way Disk Utility does.
    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        for volume in &device.volumes {
            let volume = volume.to_string_lossy();
            diskutil(&["unmountDisk", &volume])?;
            debug!(volume = %volume, "unmounted");
        }
        Ok(())
    }
}
