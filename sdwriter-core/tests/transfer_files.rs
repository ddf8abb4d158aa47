//! Write and verify passes against regular files standing in for devices.

use sdwriter_core::Error;
use sdwriter_core::transfer::{self, Mode, TransferConfig};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

/// An image of `len` pseudo-random bytes and an empty "device" next to it.
fn fixture(len: usize) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("sdcard.img");
    let device = dir.path().join("device.bin");

    let mut state = 0x2545_f491_u32;
    let bytes: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect();
    fs::write(&image, bytes).unwrap();
    fs::write(&device, b"").unwrap();
    (dir, image, device)
}

fn pass(image: &Path, device: &Path, mode: Mode) -> sdwriter_core::Result<transfer::TransferReport> {
    let running = Arc::new(AtomicBool::new(true));
    transfer::run(
        image,
        device,
        mode,
        &TransferConfig::default(),
        running,
        |_, _| {},
        |_| {},
    )
}

#[test]
fn write_then_verify_round_trip() {
    let len = 5 * transfer::CHUNK_SIZE + 123;
    let (_dir, image, device) = fixture(len);

    let written = pass(&image, &device, Mode::Write).unwrap();
    assert_eq!(written.total_bytes, len as u64);
    assert_eq!(written.chunks, 6);
    assert_eq!(fs::read(&device).unwrap(), fs::read(&image).unwrap());

    let verified = pass(&image, &device, Mode::Verify).unwrap();
    assert_eq!(verified.mode, Mode::Verify);
    assert!(verified.throughput_mb_per_sec().is_finite());
}

#[test]
fn corrupted_byte_is_located_exactly() {
    let len = 3 * transfer::CHUNK_SIZE;
    let (_dir, image, device) = fixture(len);
    pass(&image, &device, Mode::Write).unwrap();

    let offset = transfer::CHUNK_SIZE as u64 + 4321;
    let expected = fs::read(&image).unwrap()[offset as usize];
    let corrupt = !expected;
    {
        let mut f = OpenOptions::new().write(true).open(&device).unwrap();
        f.seek(SeekFrom::Start(offset)).unwrap();
        f.write_all(&[corrupt]).unwrap();
    }

    match pass(&image, &device, Mode::Verify) {
        Err(Error::Mismatch(report)) => {
            assert_eq!(report.offset, offset);
            assert_eq!(report.expected, expected);
            assert_eq!(report.actual, corrupt);
            assert_eq!(
                report.to_string(),
                format!(
                    "Error at address 0x{:X}: file=0x{:02X}, disk=0x{:02X}",
                    offset, expected, corrupt
                )
            );
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[test]
fn device_shorter_than_image_fails_verify() {
    let (_dir, image, device) = fixture(2 * transfer::CHUNK_SIZE);
    fs::write(&device, vec![0u8; 100]).unwrap();
    assert!(matches!(
        pass(&image, &device, Mode::Verify),
        Err(Error::ShortRead { .. }) | Err(Error::Mismatch(_))
    ));
}

#[test]
fn missing_image_names_the_path() {
    let (dir, _image, device) = fixture(10);
    let missing = dir.path().join("missing.img");
    let err = pass(&missing, &device, Mode::Write).unwrap_err();
    assert!(matches!(err, Error::OpenSource { .. }));
    assert!(err.to_string().contains("missing.img"));
}

#[test]
fn missing_device_is_an_open_failure() {
    let (dir, image, _device) = fixture(10);
    let err = pass(&image, &dir.path().join("sdz"), Mode::Write).unwrap_err();
    assert!(matches!(err, Error::OpenTarget { .. }));
    assert!(err.to_string().contains("cannot open device"));
}

#[test]
fn empty_image_writes_nothing() {
    let (_dir, image, device) = fixture(0);
    let report = pass(&image, &device, Mode::Write).unwrap();
    assert_eq!(report.chunks, 0);
    assert_eq!(fs::metadata(&device).unwrap().len(), 0);
}

#[test]
fn progress_ticks_follow_the_plan() {
    let len = 200 * transfer::CHUNK_SIZE;
    let (_dir, image, device) = fixture(len);
    let running = Arc::new(AtomicBool::new(true));

    let mut planned = None;
    let mut ticks = 0u64;
    let mut last = 0u64;
    transfer::run(
        &image,
        &device,
        Mode::Write,
        &TransferConfig::default(),
        running,
        |session, plan| {
            assert_eq!(session.bytes_processed(), 0);
            planned = Some(*plan);
        },
        |session| {
            assert!(session.bytes_processed() > last);
            assert!(session.bytes_processed() <= session.total_bytes());
            last = session.bytes_processed();
            ticks += 1;
        },
    )
    .unwrap();

    let plan = planned.unwrap();
    assert_eq!(plan.total_chunks, 200);
    assert_eq!(plan.step, 4);
    assert_eq!(ticks, plan.ticks);
    assert!(ticks < transfer::MAX_TICKS);
}
