//! Drive Identity
//!
//! Derives the stable [`DriveKey`] used to recognise the same physical disk
//! across rescans and reboots.
//!
//! Priority, first match wins:
//! 1. a `/dev/disk/by-id` link, by preferred prefix
//! 2. the device WWID
//! 3. the device serial
//! 4. a hash of name, model, vendor and size
//!
//! The last fallback changes if the device is renamed. Persisted adoptions
//! key on exactly this value, so it must not be "improved" silently.

use crate::domain::drive::{DriveInfo, DriveKey};

/// by-id link prefixes, most stable first
pub const BY_ID_PREFIXES: &[&str] = &["wwn-", "nvme-eui.", "nvme-uuid.", "nvme-", "ata-", "scsi-"];

/// Compute the stable key of a scanned drive. Never fails.
pub fn derive_key(drive: &DriveInfo) -> DriveKey {
    for prefix in BY_ID_PREFIXES {
        let best = drive
            .by_id
            .iter()
            .filter(|link| link.starts_with(prefix))
            .min();
        if let Some(link) = best {
            return DriveKey::new(DriveKey::BY_ID, link.clone());
        }
    }

    let wwid = drive.wwid.trim();
    if !wwid.is_empty() {
        return DriveKey::new(DriveKey::WWID, wwid);
    }

    let serial = drive.serial.trim();
    if !serial.is_empty() {
        return DriveKey::new(DriveKey::SERIAL, serial);
    }

    DriveKey::new(
        DriveKey::HASH,
        format!(
            "{}_{}_{}_{}",
            drive.name, drive.model, drive.vendor, drive.size_bytes
        ),
    )
}
