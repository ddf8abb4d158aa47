use crate::device::{Candidate, DeviceDescriptor, DeviceEnumerator, Transport, qualifying};
use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::io;
use std::path::PathBuf;

/// An enumerator that reports a fixed set of disks.
///
/// Candidates go through the same qualification policy as the platform
/// scanners, so a simulated empty card reader is filtered out just like a
/// real one. Calls are counted so callers can check whether a scan happened.
#[derive(Default)]
pub struct SimulatedEnumerator {
    candidates: Vec<Candidate>,
    scans: Cell<usize>,
    prepared: RefCell<Vec<PathBuf>>,
    fail_prepare: bool,
}

impl SimulatedEnumerator {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    /// Adds a USB disk with the given removable flag and size.
    pub fn with_disk(mut self, path: &str, size_bytes: u64, removable: bool) -> Self {
        self.candidates.push(Candidate {
            descriptor: DeviceDescriptor {
                path: PathBuf::from(path),
                size_bytes,
                vendor: "Simulated".to_string(),
                product: format!("Disk {}", self.candidates.len() + 1),
                volumes: Vec::new(),
            },
            removable,
            transport: Transport::Usb,
        });
        self
    }

    /// Makes every [`DeviceEnumerator::prepare`] call fail.
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// How many times [`DeviceEnumerator::enumerate`] has been called.
    pub fn scans(&self) -> usize {
        self.scans.get()
    }

    /// Devices passed to [`DeviceEnumerator::prepare`], in call order.
    pub fn prepared(&self) -> Vec<PathBuf> {
        self.prepared.borrow().clone()
    }
}

impl DeviceEnumerator for SimulatedEnumerator {
    fn enumerate(&self, max_count: usize) -> Result<Vec<DeviceDescriptor>> {
        self.scans.set(self.scans.get() + 1);
        Ok(qualifying(self.candidates.iter().cloned(), max_count))
    }

    fn prepare(&self, device: &DeviceDescriptor) -> io::Result<()> {
        self.prepared.borrow_mut().push(device.path.clone());
        if self.fail_prepare {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                "simulated volume is busy",
            ));
        }
        Ok(())
    }
}
