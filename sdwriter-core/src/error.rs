//! The error taxonomy shared by every stage of an imaging run.
//!
//! Every error here is terminal for the run that produced it: nothing in the
//! library retries or resumes. The front-end decides how to present each
//! variant and which exit status to use, see [`Error::is_clean_exit`].
use crate::transfer::MismatchReport;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The platform's device-management service could not be queried.
    #[error("device enumeration failed: {0}")]
    Enumeration(#[source] io::Error),

    /// Enumeration succeeded but no removable USB disk qualified.
    #[error("No removable USB disks available.")]
    NoCandidates,

    #[error("{}: {source}", .path.display())]
    OpenSource { path: PathBuf, source: io::Error },

    #[error("cannot open device {}: {source}{}", .path.display(), privilege_hint(.source))]
    OpenTarget { path: PathBuf, source: io::Error },

    #[error("{}: read error, expected {expected} bytes, got {actual}", .path.display())]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("{}: write error, expected {expected} bytes, wrote {actual}", .path.display())]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The first byte on the device that differs from the image.
    #[error("{0}")]
    Mismatch(MismatchReport),

    #[error("image is {image} bytes but the device only holds {device} bytes")]
    ImageTooLarge { image: u64, device: u64 },

    /// The cancellation flag was cleared between two chunks.
    #[error("Interrupted.")]
    Interrupted,
}

impl Error {
    /// Outcomes that end the program with a zero status: nothing to do, or
    /// the user asked to stop.
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, Error::NoCandidates | Error::Interrupted)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

fn privilege_hint(err: &io::Error) -> &'static str {
    if err.kind() == io::ErrorKind::PermissionDenied {
        if cfg!(windows) {
            "\nAdministrator permissions required."
        } else {
            "\nRoot privileges may be required (try sudo)."
        }
    } else {
        ""
    }
}
