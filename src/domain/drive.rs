//! Drive Model
//!
//! Scan-time drive snapshots, their stable keys, and adoption records.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// Drive Key
// =============================================================================

/// Stable identity of a physical device, rendered as `kind:value`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveKey {
    pub kind: String,
    pub value: String,
}

impl DriveKey {
    pub const BY_ID: &'static str = "by-id";
    pub const WWID: &'static str = "wwid";
    pub const SERIAL: &'static str = "serial";
    pub const HASH: &'static str = "hash";

    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Parse `kind:value`, splitting at the first colon
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, value)) if !kind.is_empty() && !value.is_empty() => {
                Ok(Self::new(kind, value))
            }
            _ => Err(Error::InvalidDriveKey(s.to_string())),
        }
    }
}

impl std::fmt::Display for DriveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl FromStr for DriveKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// =============================================================================
// Device Type
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Nvme,
    Ssd,
    Hdd,
    Loop,
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Nvme => write!(f, "nvme"),
            DeviceType::Ssd => write!(f, "ssd"),
            DeviceType::Hdd => write!(f, "hdd"),
            DeviceType::Loop => write!(f, "loop"),
            DeviceType::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Drive Info
// =============================================================================

/// A partition of a scanned drive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub path: String,
    pub mount_point: String,
    pub fs_type: String,
    pub fs_avail: u64,
}

/// Snapshot of one block device, taken at scan time
///
/// A fresh value is produced on every scan. Continuity across scans comes
/// from `drive_key`, never from object identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveInfo {
    pub name: String,
    pub path: String,
    pub logical_block_size: u64,
    pub physical_block_size: u64,
    pub size_bytes: u64,
    pub rotational: bool,
    pub model: String,
    pub vendor: String,
    pub serial: String,
    pub wwid: String,
    /// Names of the `/dev/disk/by-id` links resolving to this device
    pub by_id: Vec<String>,
    pub device_type: DeviceType,
    pub mount_point: String,
    pub fs_type: String,
    pub fs_avail: u64,
    pub partitions: Vec<PartitionInfo>,
    pub drive_key: DriveKey,
    /// Set only once the drive is matched to an adoption record
    pub uuid: Option<Uuid>,
}

impl DriveInfo {
    pub fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty()
    }

    /// Mount points of the device itself and of its partitions
    pub fn mount_points(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.mount_point.as_str())
            .chain(self.partitions.iter().map(|p| p.mount_point.as_str()))
            .filter(|m| !m.is_empty())
    }
}

// =============================================================================
// Adopted Drive
// =============================================================================

/// A drive claimed for pool use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptedDrive {
    pub drive: DriveInfo,
    pub uuid: Uuid,
    /// `None` while free, the owning pool's uuid while bound
    pub pool_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AdoptedDrive {
    /// Mint a fresh adoption, stamping the new uuid onto the drive
    pub fn mint(mut drive: DriveInfo) -> Self {
        let uuid = Uuid::new_v4();
        drive.uuid = Some(uuid);
        Self {
            drive,
            uuid,
            pool_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &DriveKey {
        &self.drive.drive_key
    }

    pub fn is_free(&self) -> bool {
        self.pool_id.is_none()
    }

    /// Replace the scanned info, keeping this adoption's identity
    pub fn rebind(&mut self, mut drive: DriveInfo) {
        drive.uuid = Some(self.uuid);
        self.drive = drive;
    }
}
