//! Drive Filter
//!
//! Predicates over scanned drives. Every set field must match.

use crate::domain::drive::DriveInfo;
use serde::{Deserialize, Serialize};

/// Smallest drive shown in the system view by default (1 GiB)
pub const DEFAULT_MIN_DRIVE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFilter {
    /// Allowed device name prefixes
    pub names: Vec<String>,
    pub rotational: Option<bool>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_avail: Option<u64>,
    pub max_avail: Option<u64>,
    pub mounted: Option<bool>,
    /// Matches the device's own mount point or any of its partitions'
    pub mount_prefix: Option<String>,
}

impl DriveFilter {
    /// Filter used for the system drive view
    pub fn system(min_size: u64) -> Self {
        Self {
            min_size: Some(min_size),
            ..Default::default()
        }
    }

    pub fn matches(&self, drive: &DriveInfo) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| drive.name.starts_with(n.as_str())) {
            return false;
        }
        if self.rotational.is_some_and(|r| r != drive.rotational) {
            return false;
        }
        if self.min_size.is_some_and(|min| drive.size_bytes < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| drive.size_bytes > max) {
            return false;
        }
        if self.min_avail.is_some_and(|min| drive.fs_avail < min) {
            return false;
        }
        if self.max_avail.is_some_and(|max| drive.fs_avail > max) {
            return false;
        }
        if self.mounted.is_some_and(|m| m != drive.mount_points().next().is_some()) {
            return false;
        }
        if let Some(prefix) = &self.mount_prefix {
            if !drive.mount_points().any(|m| m.starts_with(prefix.as_str())) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, drives: Vec<DriveInfo>) -> Vec<DriveInfo> {
        drives.into_iter().filter(|d| self.matches(d)).collect()
    }
}
