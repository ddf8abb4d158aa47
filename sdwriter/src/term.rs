//! Terminal state and signal handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::io::{IsTerminal, stdout};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

/// The terminal settings to put back on exit.
#[derive(Clone, Copy)]
pub struct TermSnapshot {
    #[cfg(unix)]
    original: Option<Termios>,
}

impl TermSnapshot {
    pub fn restore(&self) {
        #[cfg(unix)]
        if let Some(ref original) = self.original {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original).ok();
        }
    }
}

/// Turns off `ECHOCTL` so that Ctrl+C is not echoed as `^C` over the
/// progress line. The setting is restored on drop.
pub struct TermGuard {
    snapshot: TermSnapshot,
}

impl TermGuard {
    pub fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            let original = if stdout().is_terminal() {
                Termios::from_fd(fd).ok().filter(|original| {
                    let mut quiet = *original;
                    quiet.c_lflag &= !ECHOCTL;
                    tcsetattr(fd, TCSANOW, &quiet).is_ok()
                })
            } else {
                None
            };
            Self {
                snapshot: TermSnapshot { original },
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                snapshot: TermSnapshot {},
            }
        }
    }

    pub fn snapshot(&self) -> TermSnapshot {
        self.snapshot
    }
}

impl Drop for TermGuard {
    fn drop(&mut self) {
        self.snapshot.restore();
    }
}

/// Routes SIGINT, SIGTERM and SIGHUP.
///
/// While a transfer is armed, a signal only clears the `running` flag and
/// the transfer stops before its next chunk, closing its handles on the way
/// out. Otherwise nothing is open and the process exits right away, which
/// also unblocks a pending menu prompt.
pub struct Shutdown {
    running: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn install(term: TermSnapshot) -> Result<Self, ctrlc::Error> {
        let running = Arc::new(AtomicBool::new(true));
        let armed = Arc::new(AtomicBool::new(false));

        let (r, a) = (running.clone(), armed.clone());
        ctrlc::set_handler(move || {
            if a.load(Ordering::SeqCst) {
                r.store(false, Ordering::SeqCst);
            } else {
                eprintln!("\nInterrupted.");
                term.restore();
                std::process::exit(0);
            }
        })?;

        Ok(Self { running, armed })
    }

    /// The flag to hand to a transfer.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Marks the span during which signals are delivered cooperatively.
    pub fn arm(&self) -> ArmedGuard<'_> {
        self.armed.store(true, Ordering::SeqCst);
        ArmedGuard(self)
    }
}

pub struct ArmedGuard<'a>(&'a Shutdown);

impl Drop for ArmedGuard<'_> {
    fn drop(&mut self) {
        self.0.armed.store(false, Ordering::SeqCst);
    }
}
