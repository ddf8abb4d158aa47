//! Streams an image file to a device, or compares a device against an image.
//!
//! A run is a single [`TransferSession`]: the image is processed in
//! fixed-size chunks, each chunk is written to (or read back from) the
//! device, and a progress tick is emitted every [`ProgressPlan::step`]
//! chunks. In write mode every tick is also a durability checkpoint: the
//! device is flushed, so an abrupt stop loses at most one step of data.
//!
//! Any short read, short write or mismatching byte ends the run with an
//! error. Nothing is retried.
use crate::error::{Error, Result};
use crate::os_options;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Bytes moved per I/O call.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Upper bound on the width of the progress indicator.
pub const MAX_TICKS: u64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Copy the image onto the device.
    Write,
    /// Compare the device contents against the image.
    Verify,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Mode::Write => "Write",
            Mode::Verify => "Verify",
        })
    }
}

#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub max_ticks: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_ticks: MAX_TICKS,
        }
    }
}

/// How the chunks of a session map onto progress ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressPlan {
    /// `ceil(total_bytes / chunk_size)`.
    pub total_chunks: u64,
    /// Chunks per tick: the smallest power of two keeping the tick count
    /// strictly below `max_ticks`.
    pub step: u64,
    /// Ticks emitted over the whole session.
    pub ticks: u64,
}

impl ProgressPlan {
    pub fn new(total_bytes: u64, chunk_size: usize, max_ticks: u64) -> Self {
        let total_chunks = total_bytes.div_ceil(chunk_size.max(1) as u64);
        let budget = max_ticks.max(2);

        let mut step = 1u64;
        while total_chunks.div_ceil(step) >= budget {
            step <<= 1;
        }

        Self {
            total_chunks,
            step,
            ticks: total_chunks / step,
        }
    }
}

/// The state of one write or verify pass.
#[derive(Debug)]
pub struct TransferSession {
    source_path: PathBuf,
    target_path: PathBuf,
    mode: Mode,
    total_bytes: u64,
    bytes_processed: u64,
    start_time: Instant,
}

impl TransferSession {
    pub fn new(
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        mode: Mode,
        total_bytes: u64,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            mode,
            total_bytes,
            bytes_processed: 0,
            start_time: Instant::now(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The image size, fixed when the session starts.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    fn finish(self, chunks: u64) -> TransferReport {
        TransferReport {
            mode: self.mode,
            total_bytes: self.total_bytes,
            chunks,
            elapsed: self.start_time.elapsed(),
        }
    }
}

/// The outcome of a completed pass.
#[derive(Clone, Debug)]
pub struct TransferReport {
    pub mode: Mode,
    pub total_bytes: u64,
    /// Number of chunks processed.
    pub chunks: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn throughput_mb_per_sec(&self) -> f64 {
        throughput_mb_per_sec(self.total_bytes, self.elapsed)
    }
}

/// Average speed in MB/s (10^6 bytes), with elapsed time clamped to 1 ms.
pub fn throughput_mb_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let millis = elapsed.as_millis().max(1);
    bytes as f64 / 1000.0 / millis as f64
}

/// The first byte where the device differs from the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MismatchReport {
    /// Absolute offset from the start of the image.
    pub offset: u64,
    /// The byte in the image file.
    pub expected: u8,
    /// The byte read back from the device.
    pub actual: u8,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error at address 0x{}: file=0x{:02X}, disk=0x{:02X}",
            format_offset(self.offset),
            self.expected,
            self.actual
        )
    }
}

/// Hex rendering of a byte offset: a single group below 4 GiB, otherwise
/// the high and low 32-bit halves as two 8-digit groups.
pub fn format_offset(offset: u64) -> String {
    let high = offset >> 32;
    let low = offset & 0xffff_ffff;
    if high == 0 {
        format!("{low:X}")
    } else {
        format!("{high:08X}{low:08X}")
    }
}

/// Compares two equally sized chunks starting at `chunk_offset`.
pub fn first_mismatch(expected: &[u8], actual: &[u8], chunk_offset: u64) -> Option<MismatchReport> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|i| MismatchReport {
            offset: chunk_offset + i as u64,
            expected: expected[i],
            actual: actual[i],
        })
}

/// A device that can be read, written and flushed to stable storage.
pub trait RawDevice: Read + Write {
    /// Commits all buffered writes to the medium.
    fn sync(&mut self) -> io::Result<()>;
}

impl RawDevice for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Counts chunks and says when a tick boundary is crossed.
struct Ticker {
    step: u64,
    count: u64,
}

impl Ticker {
    fn advance(&mut self) -> bool {
        self.count += 1;
        self.count % self.step == 0
    }
}

/// Fills `buf` with a single read call. EINTR is retried; any other short
/// count is a fault.
fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], path: &Path) -> Result<()> {
    loop {
        match reader.read(buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => {
                return Err(Error::ShortRead {
                    path: path.to_path_buf(),
                    expected: buf.len(),
                    actual: n,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
    }
}

/// Writes `buf` with a single write call. EINTR is retried; any other short
/// count is a fault.
fn write_chunk<W: Write + ?Sized>(writer: &mut W, buf: &[u8], path: &Path) -> Result<()> {
    loop {
        match writer.write(buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => {
                return Err(Error::ShortWrite {
                    path: path.to_path_buf(),
                    expected: buf.len(),
                    actual: n,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
    }
}

/// Runs one pass over already opened streams.
///
/// `on_start` is called once with the session and its progress plan before
/// the first chunk. `on_tick` is called each time a tick boundary is
/// crossed, after the checkpoint flush in write mode.
///
/// # Errors
///
/// - [`Error::ShortRead`] / [`Error::ShortWrite`] when an I/O call moves
///   fewer bytes than asked.
/// - [`Error::Mismatch`] at the first differing byte in verify mode.
/// - [`Error::Interrupted`] when `running` is cleared between chunks.
pub fn transfer<S, D, F>(
    mut session: TransferSession,
    mut source: S,
    mut device: D,
    config: &TransferConfig,
    running: &AtomicBool,
    on_start: impl FnOnce(&TransferSession, &ProgressPlan),
    mut on_tick: F,
) -> Result<TransferReport>
where
    S: Read,
    D: RawDevice,
    F: FnMut(&TransferSession),
{
    let chunk_size = config.chunk_size.max(1);
    let plan = ProgressPlan::new(session.total_bytes, chunk_size, config.max_ticks);
    debug!(
        mode = %session.mode,
        bytes = session.total_bytes,
        chunks = plan.total_chunks,
        step = plan.step,
        "starting session"
    );
    on_start(&session, &plan);

    let mut ticker = Ticker {
        step: plan.step,
        count: 0,
    };
    let mut buf = vec![0u8; chunk_size];
    let mut disk_buf = match session.mode {
        Mode::Verify => vec![0u8; chunk_size],
        Mode::Write => Vec::new(),
    };

    while session.bytes_processed < session.total_bytes {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }

        let offset = session.bytes_processed;
        let n = (session.total_bytes - offset).min(chunk_size as u64) as usize;
        read_chunk(&mut source, &mut buf[..n], &session.source_path)?;

        match session.mode {
            Mode::Write => write_chunk(&mut device, &buf[..n], &session.target_path)?,
            Mode::Verify => {
                read_chunk(&mut device, &mut disk_buf[..n], &session.target_path)?;
                if let Some(report) = first_mismatch(&buf[..n], &disk_buf[..n], offset) {
                    return Err(Error::Mismatch(report));
                }
            }
        }
        session.bytes_processed += n as u64;

        if ticker.advance() {
            if session.mode == Mode::Write {
                device
                    .sync()
                    .map_err(|e| Error::io(&session.target_path, e))?;
                trace!(bytes = session.bytes_processed, "checkpoint flush");
            }
            on_tick(&session);
        }
    }

    if session.mode == Mode::Write {
        device
            .sync()
            .map_err(|e| Error::io(&session.target_path, e))?;
    }

    Ok(session.finish(ticker.count))
}

/// Writes an image file to a device, or verifies a device against it.
///
/// The image is opened read-only and the device read-write; the image's
/// size when the session starts is the transfer length. Both handles are
/// closed when this function returns, whatever the outcome.
///
/// # Arguments
///
/// * `image_path` - The raw image file.
/// * `device_path` - The target device node.
/// * `mode` - Whether to write or to verify.
/// * `config` - Chunk size and progress budget.
/// * `running` - Cleared by a signal handler to stop between chunks.
/// * `on_start` - Called once before the first chunk.
/// * `on_tick` - Called at every progress tick.
///
/// # Errors
///
/// Besides the errors of [`transfer`]:
/// - [`Error::OpenSource`] / [`Error::OpenTarget`] when either side cannot be opened.
/// - [`Error::ImageTooLarge`] when the target is a block device smaller than the image.
pub fn run<F>(
    image_path: &Path,
    device_path: &Path,
    mode: Mode,
    config: &TransferConfig,
    running: Arc<AtomicBool>,
    on_start: impl FnOnce(&TransferSession, &ProgressPlan),
    on_tick: F,
) -> Result<TransferReport>
where
    F: FnMut(&TransferSession),
{
    let open_source = |e| Error::OpenSource {
        path: image_path.to_path_buf(),
        source: e,
    };
    let image = File::open(image_path).map_err(open_source)?;
    let image_len = image.metadata().map_err(open_source)?.len();

    let device = os_options::open_raw_device(device_path).map_err(|e| Error::OpenTarget {
        path: device_path.to_path_buf(),
        source: e,
    })?;

    if let Some(capacity) =
        os_options::block_device_size(&device).map_err(|e| Error::io(device_path, e))?
    {
        if image_len > capacity {
            return Err(Error::ImageTooLarge {
                image: image_len,
                device: capacity,
            });
        }
    }

    let session = TransferSession::new(image_path, device_path, mode, image_len);
    transfer(session, image, device, config, &running, on_start, on_tick)
}
