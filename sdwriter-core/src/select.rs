//! Resolves the target device, interactively when none was given.
use crate::device::{DeviceDescriptor, DeviceEnumerator};
use crate::error::{Error, Result};
use crate::platform::MAX_DEVICES;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// The outcome of device selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// The path to open for raw access, with the descriptor when it came
    /// from the menu.
    Device {
        path: PathBuf,
        descriptor: Option<DeviceDescriptor>,
    },
    /// The user typed the cancel key or closed the input.
    Cancelled,
}

enum Reply {
    Pick(usize),
    Cancel,
    Invalid,
}

fn parse_reply(line: &str, count: usize) -> Reply {
    let reply = line.trim();
    if reply.starts_with(['q', 'Q']) {
        return Reply::Cancel;
    }
    match reply.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Reply::Pick(n - 1),
        _ => Reply::Invalid,
    }
}

fn print_menu<W: Write>(out: &mut W, devices: &[DeviceDescriptor]) -> io::Result<()> {
    writeln!(out)?;
    for (i, device) in devices.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, device)?;
    }
    writeln!(out, "  q. Cancel")?;
    writeln!(out)?;
    if devices.len() > 1 {
        write!(out, "Select disk device (1-{}, q): ", devices.len())?;
    } else {
        write!(out, "Select disk device (1, q): ")?;
    }
    out.flush()
}

fn print_guidance<W: Write>(out: &mut W, count: usize) -> io::Result<()> {
    writeln!(out)?;
    if count > 1 {
        writeln!(out, "Enter 1...{count} to select a device,")?;
    } else {
        writeln!(out, "Enter 1 to select a device,")?;
    }
    writeln!(out, "or `Q' to cancel the operation.")
}

/// Resolves the device to write to.
///
/// An explicit path is returned unchanged without scanning, so scripts can
/// bypass the menu. Otherwise `enumerator` is scanned and a numbered menu
/// is written to `output`; lines are read from `input` until one picks a
/// device, cancels, or the input ends. Invalid replies re-prompt.
///
/// A picked device goes through [`DeviceEnumerator::prepare`] before it is
/// returned. A failure there is logged and otherwise ignored, since opening
/// the raw device is what decides whether access is possible.
///
/// # Errors
///
/// - [`Error::Enumeration`] when the platform scan fails.
/// - [`Error::NoCandidates`] when no removable USB disk is present.
/// - [`Error::Io`] when the prompt cannot be written or read.
pub fn select<E, R, W>(explicit: Option<&Path>, enumerator: &E, input: R, output: W) -> Result<Selection>
where
    E: DeviceEnumerator + ?Sized,
    R: BufRead,
    W: Write,
{
    select_with(explicit, enumerator, input, output, |_| Ok(true))
}

/// Like [`select`], but asks `confirm` about a device picked from the menu
/// before it is prepared. A `false` answer cancels the selection and leaves
/// the device untouched.
///
/// # Errors
///
/// Those of [`select`], plus [`Error::Interrupted`] when `confirm` fails
/// with [`io::ErrorKind::Interrupted`] (Ctrl+C at a raw-mode prompt).
pub fn select_with<E, R, W, C>(
    explicit: Option<&Path>,
    enumerator: &E,
    mut input: R,
    mut output: W,
    mut confirm: C,
) -> Result<Selection>
where
    E: DeviceEnumerator + ?Sized,
    R: BufRead,
    W: Write,
    C: FnMut(&DeviceDescriptor) -> io::Result<bool>,
{
    if let Some(path) = explicit {
        return Ok(Selection::Device {
            path: path.to_path_buf(),
            descriptor: None,
        });
    }

    let devices = enumerator.enumerate(MAX_DEVICES)?;
    if devices.is_empty() {
        return Err(Error::NoCandidates);
    }

    let console = |e: io::Error| match e.kind() {
        io::ErrorKind::Interrupted => Error::Interrupted,
        _ => Error::io("<console>", e),
    };
    let mut line = String::new();
    loop {
        print_menu(&mut output, &devices).map_err(console)?;

        line.clear();
        if input.read_line(&mut line).map_err(console)? == 0 {
            return Ok(Selection::Cancelled);
        }

        match parse_reply(&line, devices.len()) {
            Reply::Pick(index) => {
                let device = devices[index].clone();
                writeln!(output).map_err(console)?;
                if !confirm(&device).map_err(console)? {
                    return Ok(Selection::Cancelled);
                }
                if let Err(e) = enumerator.prepare(&device) {
                    warn!(device = %device.path.display(), error = %e, "could not release volumes");
                }
                return Ok(Selection::Device {
                    path: device.path.clone(),
                    descriptor: Some(device),
                });
            }
            Reply::Cancel => {
                writeln!(output, "Cancelled.").map_err(console)?;
                return Ok(Selection::Cancelled);
            }
            Reply::Invalid => print_guidance(&mut output, devices.len()).map_err(console)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedEnumerator;
    use std::io::Cursor;

    fn two_disks() -> SimulatedEnumerator {
        SimulatedEnumerator::default()
            .with_disk("/dev/sdb", 8_000_000_000, true)
            .with_disk("/dev/sdc", 16_000_000_000, true)
    }

    fn picked(selection: Selection) -> PathBuf {
        match selection {
            Selection::Device { path, .. } => path,
            Selection::Cancelled => panic!("selection was cancelled"),
        }
    }

    #[test]
    fn explicit_path_skips_enumeration() {
        let sim = two_disks();
        let mut out = Vec::new();
        let selection = select(
            Some(Path::new("/dev/mmcblk0")),
            &sim,
            Cursor::new("2\n"),
            &mut out,
        )
        .unwrap();

        assert_eq!(picked(selection), PathBuf::from("/dev/mmcblk0"));
        assert_eq!(sim.scans(), 0);
        assert!(sim.prepared().is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn ordinal_picks_device_and_prepares_it() {
        let sim = two_disks();
        let mut out = Vec::new();
        let selection = select(None, &sim, Cursor::new("2\n"), &mut out).unwrap();

        assert_eq!(picked(selection), PathBuf::from("/dev/sdc"));
        assert_eq!(sim.prepared(), [PathBuf::from("/dev/sdc")]);

        let menu = String::from_utf8(out).unwrap();
        assert!(menu.contains("  1. /dev/sdb - Simulated Disk 1, size 8000 MB"));
        assert!(menu.contains("  2. /dev/sdc - "));
        assert!(menu.contains("  q. Cancel"));
        assert!(menu.contains("Select disk device (1-2, q): "));
    }

    #[test]
    fn invalid_replies_reprompt() {
        let sim = two_disks();
        let mut out = Vec::new();
        let selection = select(None, &sim, Cursor::new("7\nsdb\n\n1\n"), &mut out).unwrap();

        assert_eq!(picked(selection), PathBuf::from("/dev/sdb"));
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Enter 1...2 to select a device,").count(), 3);
        assert_eq!(text.matches("q. Cancel").count(), 4);
    }

    #[test]
    fn cancel_key_and_end_of_input_cancel() {
        let sim = two_disks();
        for input in ["q\n", "Q\n", ""] {
            let selection = select(None, &sim, Cursor::new(input), Vec::new()).unwrap();
            assert_eq!(selection, Selection::Cancelled, "input={input:?}");
        }
        assert!(sim.prepared().is_empty());
    }

    #[test]
    fn no_candidates_is_reported() {
        let sim = SimulatedEnumerator::default().with_disk("/dev/sdb", 0, true);
        let result = select(None, &sim, Cursor::new("1\n"), Vec::new());
        assert!(matches!(result, Err(Error::NoCandidates)));
    }

    #[test]
    fn failed_prepare_is_not_fatal() {
        let sim = two_disks().failing_prepare();
        let selection = select(None, &sim, Cursor::new("1\n"), Vec::new()).unwrap();
        assert_eq!(picked(selection), PathBuf::from("/dev/sdb"));
        assert_eq!(sim.prepared().len(), 1);
    }

    #[test]
    fn declined_confirmation_leaves_device_unprepared() {
        let sim = two_disks();
        let mut asked = Vec::new();
        let selection = select_with(None, &sim, Cursor::new("2\n"), Vec::new(), |device| {
            asked.push(device.path.clone());
            Ok(false)
        })
        .unwrap();

        assert_eq!(selection, Selection::Cancelled);
        assert_eq!(asked, [PathBuf::from("/dev/sdc")]);
        assert!(sim.prepared().is_empty());
    }

    #[test]
    fn accepted_confirmation_prepares_device() {
        let sim = two_disks();
        let selection =
            select_with(None, &sim, Cursor::new("1\n"), Vec::new(), |_| Ok(true)).unwrap();
        assert_eq!(picked(selection), PathBuf::from("/dev/sdb"));
        assert_eq!(sim.prepared(), [PathBuf::from("/dev/sdb")]);
    }

    #[test]
    fn interrupted_confirmation_is_an_interrupt() {
        let sim = two_disks();
        let result = select_with(None, &sim, Cursor::new("1\n"), Vec::new(), |_| {
            Err(io::Error::from(io::ErrorKind::Interrupted))
        });
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(sim.prepared().is_empty());
    }

    #[test]
    fn explicit_path_is_never_confirmed() {
        let sim = two_disks();
        let selection = select_with(Some(Path::new("/dev/sdb")), &sim, Cursor::new(""), Vec::new(), |_| {
            panic!("explicit device must not be confirmed")
        })
        .unwrap();
        assert_eq!(picked(selection), PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn single_device_prompt() {
        let sim = SimulatedEnumerator::default().with_disk("/dev/sdb", 1 << 30, true);
        let mut out = Vec::new();
        select(None, &sim, Cursor::new("x\n1\n"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Select disk device (1, q): "));
        assert!(text.contains("Enter 1 to select a device,"));
    }
}
