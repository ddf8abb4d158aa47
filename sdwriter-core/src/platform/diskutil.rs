//! Parsers for the text output of macOS `diskutil`.
//!
//! Kept free of any macOS API so they can be tested on every platform.
#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use crate::device::{Candidate, DeviceDescriptor, Transport};
use std::path::PathBuf;

/// Whole-disk nodes from `diskutil list`, e.g. `/dev/disk4`.
pub(crate) fn whole_disks(list_output: &str) -> Vec<String> {
    list_output
        .lines()
        .filter(|line| line.starts_with("/dev/disk"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn field<'a>(info_output: &'a str, key: &str) -> Option<&'a str> {
    info_output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// `15.9 GB (15931539456 Bytes) (exactly 31116288 512-Byte-Units)` -> 15931539456
fn size_in_bytes(value: &str) -> Option<u64> {
    let (before, _) = value.split_once(" Bytes)")?;
    before.rsplit('(').next()?.trim().parse().ok()
}

/// Builds a candidate from `diskutil info <disk>` output.
///
/// I/O goes through the raw node (`/dev/rdiskN`), which bypasses the
/// buffer cache; the block node is what gets unmounted.
pub(crate) fn parse_info(disk: &str, info_output: &str) -> Candidate {
    let removable = matches!(
        field(info_output, "Removable Media"),
        Some("Removable" | "Yes")
    ) || field(info_output, "Ejectable") == Some("Yes");

    let transport = match field(info_output, "Protocol") {
        Some("USB") => Transport::Usb,
        Some(other) => Transport::Other(other.to_string()),
        None => Transport::Unknown,
    };

    let product = field(info_output, "Device / Media Name")
        .or_else(|| field(info_output, "Media Name"))
        .unwrap_or_default()
        .to_string();

    let size_bytes = field(info_output, "Disk Size")
        .or_else(|| field(info_output, "Total Size"))
        .and_then(size_in_bytes)
        .unwrap_or(0);

    let raw = match disk.strip_prefix("/dev/") {
        Some(name) => format!("/dev/r{name}"),
        None => format!("/dev/r{disk}"),
    };

    Candidate {
        descriptor: DeviceDescriptor {
            path: PathBuf::from(raw),
            size_bytes,
            vendor: String::new(),
            product,
            volumes: vec![PathBuf::from(disk)],
        },
        removable,
        transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
/dev/disk4 (external, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:     FDisk_partition_scheme                        *15.9 GB    disk4
   1:             Windows_FAT_32 BOOT                    268.4 MB   disk4s1
   2:                      Linux                         15.7 GB    disk4s2

/dev/disk5 (external, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:                                                   *0 B        disk5
";

    const INFO: &str = "\
   Device Identifier:         disk4
   Device Node:               /dev/disk4
   Whole:                     Yes
   Part of Whole:             disk4
   Device / Media Name:       SD Card Reader

   Volume Name:               Not applicable (no file system)
   Mounted:                   Not applicable (no file system)

   Protocol:                  USB
   Disk Size:                 15.9 GB (15931539456 Bytes) (exactly 31116288 512-Byte-Units)
   Device Block Size:         512 Bytes

   Device Location:           External
   Removable Media:           Removable
   Media Removal:             Software-Activated
";

    #[test]
    fn lists_whole_disks_only() {
        assert_eq!(whole_disks(LIST), ["/dev/disk4", "/dev/disk5"]);
    }

    #[test]
    fn parses_a_usb_card_reader() {
        let c = parse_info("/dev/disk4", INFO);
        assert!(c.removable);
        assert_eq!(c.transport, Transport::Usb);
        assert_eq!(c.descriptor.path, PathBuf::from("/dev/rdisk4"));
        assert_eq!(c.descriptor.size_bytes, 15_931_539_456);
        assert_eq!(c.descriptor.product, "SD Card Reader");
        assert_eq!(c.descriptor.volumes, [PathBuf::from("/dev/disk4")]);
        assert!(c.qualifies());
    }

    fn with_field(info: &str, key: &str, value: &str) -> String {
        info.lines()
            .map(|line| match line.split_once(':') {
                Some((k, _)) if k.trim() == key => format!("{k}: {value}"),
                _ => line.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_reader_and_fixed_disks_do_not_qualify() {
        let empty = with_field(INFO, "Disk Size", "0 B (0 Bytes) (exactly 0 512-Byte-Units)");
        assert!(!parse_info("/dev/disk5", &empty).qualifies());

        let fixed = with_field(INFO, "Removable Media", "Fixed");
        assert!(!parse_info("/dev/disk4", &fixed).qualifies());
    }

    #[test]
    fn thunderbolt_disk_is_not_usb() {
        let info = with_field(INFO, "Protocol", "Thunderbolt");
        let c = parse_info("/dev/disk4", &info);
        assert_eq!(c.transport, Transport::Other("Thunderbolt".into()));
        assert!(!c.qualifies());
    }
}
