//! Provides platform-specific device discovery.
//!
//! Each supported OS has its own [`DeviceEnumerator`] implementation, and
//! [`enumerator`] returns the one matching the target platform. The
//! [`SimulatedEnumerator`] serves fixed candidate lists and is what tests
//! use in place of real hardware.

use crate::device::DeviceEnumerator;

mod diskutil;
mod simulated;

pub use self::simulated::SimulatedEnumerator;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::{LinuxEnumerator, MountEntry, MountTable};

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use self::macos::MacosEnumerator;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::WindowsEnumerator;

/// The most devices a scan reports; the selection menu uses single digits.
pub const MAX_DEVICES: usize = 9;

/// Returns the enumerator for the platform this binary was built for.
#[cfg(target_os = "linux")]
pub fn enumerator() -> Box<dyn DeviceEnumerator> {
    Box::new(LinuxEnumerator::new())
}

#[cfg(target_os = "macos")]
pub fn enumerator() -> Box<dyn DeviceEnumerator> {
    Box::new(MacosEnumerator)
}

#[cfg(target_os = "windows")]
pub fn enumerator() -> Box<dyn DeviceEnumerator> {
    Box::new(WindowsEnumerator)
}

/// Platforms without a discovery backend offer no devices; `--device` still works.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn enumerator() -> Box<dyn DeviceEnumerator> {
    tracing::warn!("don't know how to list removable disks on this system");
    Box::new(SimulatedEnumerator::default())
}
