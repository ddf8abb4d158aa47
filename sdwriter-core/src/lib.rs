//! The core, UI-agnostic library for the `sdwriter` imaging utility.
//!
//! `sdwriter-core` finds removable USB disks, lets a front-end pick one, and
//! streams a raw image onto it (or compares the disk against the image)
//! with periodic flushes and byte-exact mismatch reporting.
//!
//! The library is structured into several key modules:
//! - [`device`]: The [`DeviceDescriptor`](device::DeviceDescriptor), the
//!   removable-USB qualification policy and the [`DeviceEnumerator`](device::DeviceEnumerator) trait.
//! - [`platform`]: Per-OS enumerators (sysfs, `diskutil`, Win32) and a simulated one.
//! - [`select`]: Resolves the target device, through a numbered menu if needed.
//! - [`transfer`]: The write and verify passes.
//! - [`error`]: The error taxonomy shared by all of the above.
//!
//! Progress is reported through callbacks so the calling application can
//! render it any way it likes, and a shared flag allows stopping between
//! chunks.
//!
//! ## Example: Writing and Verifying an Image
//!
//! ```rust,no_run
//! use sdwriter_core::{platform, select, transfer};
//! use std::io;
//! use std::path::Path;
//! use std::sync::{Arc, atomic::AtomicBool};
//!
//! fn main() -> sdwriter_core::Result<()> {
//!     let image = Path::new("path/to/sdcard.img");
//!     let enumerator = platform::enumerator();
//!
//!     let device = match select::select(None, &enumerator, io::stdin().lock(), io::stdout())? {
//!         select::Selection::Device { path, .. } => path,
//!         select::Selection::Cancelled => return Ok(()),
//!     };
//!
//!     // Cleared by a signal handler to stop between chunks.
//!     let running = Arc::new(AtomicBool::new(true));
//!     let config = transfer::TransferConfig::default();
//!
//!     for mode in [transfer::Mode::Write, transfer::Mode::Verify] {
//!         let report = transfer::run(
//!             image,
//!             &device,
//!             mode,
//!             &config,
//!             running.clone(),
//!             |session, plan| println!("{}: {} bytes, {} ticks", mode, session.total_bytes(), plan.ticks),
//!             |session| println!("{} bytes", session.bytes_processed()),
//!         )?;
//!         println!("{:.1} MB/sec", report.throughput_mb_per_sec());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
mod os_options;
pub mod platform;
pub mod select;
pub mod transfer;

pub use error::{Error, Result};
