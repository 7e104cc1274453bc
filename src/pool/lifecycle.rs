//! Pool Lifecycle
//!
//! A pool is a named set of adopted drives assembled into one md array,
//! formatted and mounted under the mount base. This module owns the pool
//! value, its member management and capacity accounting, and the teardown
//! protocol. Building is delegated to the pool's [`PoolType`].

use super::raid::PoolType;
use super::status::PoolStatus;
use crate::domain::drive::AdoptedDrive;
use crate::domain::ports::PoolRecord;
use crate::error::{Error, Result};
use crate::system::{Capacity, HostTools};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Directory holding md array device nodes
const ARRAY_DEVICE_DIR: &str = "/dev/md/";

/// Length of the uuid prefix used to name a pool's array device
const ARRAY_NAME_LEN: usize = 16;

// =============================================================================
// Protocol Steps
// =============================================================================

/// Last completed step of the build protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStep {
    ArrayCreated,
    Formatted,
    MountDirCreated,
    Mounted,
}

/// Last completed step of the teardown protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TeardownStep {
    Unmounted,
    MountDirRemoved,
    ArrayRemoved,
    ArrayStopped,
    SuperblocksZeroed,
}

// =============================================================================
// Names
// =============================================================================

/// Trim a pool name and check it against `^[A-Za-z0-9][A-Za-z0-9._-]*$`
pub fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(Error::InvalidPoolName(name.to_string()))
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A storage pool and its member drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub name: String,
    pub uuid: Uuid,
    pub status: PoolStatus,
    /// Empty while the pool is not mounted
    pub mount_point: String,
    #[serde(rename = "mdDevice")]
    pub array_device: String,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
    pub total_capacity: u64,
    pub available_capacity: u64,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub adopted_drives: BTreeMap<Uuid, AdoptedDrive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_step: Option<BuildStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_step: Option<TeardownStep>,
}

impl Pool {
    /// Create an unbuilt pool owning `drives`
    pub fn new(
        name: &str,
        pool_type: PoolType,
        format: &str,
        drives: Vec<AdoptedDrive>,
    ) -> Result<Self> {
        let name = sanitize_name(name)?;
        let uuid = Uuid::new_v4();
        let id = uuid.to_string();

        let mut pool = Self {
            name,
            uuid,
            status: PoolStatus::Offline,
            mount_point: String::new(),
            array_device: format!("{}{}", ARRAY_DEVICE_DIR, &id[..ARRAY_NAME_LEN]),
            pool_type,
            total_capacity: 0,
            available_capacity: 0,
            format: format.to_string(),
            created_at: Utc::now(),
            adopted_drives: BTreeMap::new(),
            build_step: None,
            teardown_step: None,
        };
        pool.add_drives(drives);
        Ok(pool)
    }

    /// Rebuild a pool from its persisted row and bound drives
    ///
    /// Protocol steps are not persisted. A pool with a mount point is
    /// treated as fully built.
    pub fn from_record(record: PoolRecord, drives: Vec<AdoptedDrive>) -> Self {
        let mut pool = Self {
            name: record.name,
            uuid: record.uuid,
            status: record.status,
            mount_point: record.mount_point,
            array_device: record.array_device,
            pool_type: record.pool_type,
            total_capacity: 0,
            available_capacity: 0,
            format: record.format,
            created_at: record.created_at,
            adopted_drives: BTreeMap::new(),
            build_step: None,
            teardown_step: None,
        };
        if !pool.mount_point.is_empty() {
            pool.build_step = Some(BuildStep::Mounted);
        }
        pool.add_drives(drives);
        pool
    }

    pub fn to_record(&self) -> PoolRecord {
        PoolRecord {
            uuid: self.uuid,
            name: self.name.clone(),
            mount_point: self.mount_point.clone(),
            array_device: self.array_device.clone(),
            status: self.status,
            pool_type: self.pool_type,
            format: self.format.clone(),
            created_at: self.created_at,
        }
    }

    pub fn is_built(&self) -> bool {
        self.build_reached(BuildStep::Mounted)
    }

    pub fn build_reached(&self, step: BuildStep) -> bool {
        self.build_step >= Some(step)
    }

    pub fn teardown_reached(&self, step: TeardownStep) -> bool {
        self.teardown_step >= Some(step)
    }

    // =========================================================================
    // Members
    // =========================================================================

    /// Bind drives to this pool
    pub fn add_drives(&mut self, drives: impl IntoIterator<Item = AdoptedDrive>) {
        for mut drive in drives {
            drive.pool_id = Some(self.uuid);
            self.adopted_drives.insert(drive.uuid, drive);
        }
        self.recompute_capacity();
    }

    /// Unbind and return the named drives; unknown uuids are ignored
    pub fn remove_drives(&mut self, uuids: &[Uuid]) -> Result<Vec<AdoptedDrive>> {
        if uuids.is_empty() {
            return Err(Error::NoDrivesToRemove);
        }
        let removed = uuids
            .iter()
            .filter_map(|uuid| self.adopted_drives.remove(uuid))
            .map(|mut drive| {
                drive.pool_id = None;
                drive
            })
            .collect();
        self.recompute_capacity();
        Ok(removed)
    }

    /// Look up member drives by uuid
    pub fn drives(&self, uuids: &[Uuid]) -> Result<Vec<&AdoptedDrive>> {
        uuids
            .iter()
            .map(|uuid| {
                self.adopted_drives
                    .get(uuid)
                    .ok_or(Error::DriveNotFoundOrInUse { uuid: *uuid })
            })
            .collect()
    }

    /// Member device paths, sorted
    pub fn member_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .adopted_drives
            .values()
            .map(|d| d.drive.path.clone())
            .collect();
        paths.sort();
        paths
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Pre-build capacity from member sizes; a built pool keeps its measured values
    fn recompute_capacity(&mut self) {
        if self.is_built() {
            return;
        }
        let members = self.adopted_drives.values().map(|d| &d.drive);
        self.total_capacity = members.clone().map(|d| d.size_bytes).sum();
        self.available_capacity = members.map(|d| d.fs_avail).sum();
    }

    pub async fn query_capacity(&self, tools: &HostTools) -> Result<Capacity> {
        tools.capacity(&self.array_device).await
    }

    pub fn set_capacity(&mut self, capacity: Capacity) {
        self.total_capacity = capacity.total;
        self.available_capacity = capacity.available;
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    fn mount_dir(&self, tools: &HostTools) -> PathBuf {
        if self.mount_point.is_empty() {
            tools.mount_dir(self.uuid)
        } else {
            PathBuf::from(&self.mount_point)
        }
    }

    /// Unmount, remove the mount directory, dismantle the array and clear
    /// member superblocks
    ///
    /// Steps a partial build never reached are skipped, as are steps a
    /// previous attempt already completed. Each completed step rolls
    /// `build_step` back to what is still standing, so a later build
    /// redoes exactly the undone work. The first failure stops the protocol
    /// with `teardown_step` recording how far it got.
    pub async fn teardown(&mut self, tools: &HostTools) -> Result<()> {
        let dir = self.mount_dir(tools);
        let array_present = self.build_reached(BuildStep::ArrayCreated)
            || Path::new(&self.array_device).exists();

        info!("Tearing down pool {} ({})", self.name, self.uuid);

        if self.is_built() && !self.teardown_reached(TeardownStep::Unmounted) {
            tools.unmount(&dir).await?;
            self.teardown_step = Some(TeardownStep::Unmounted);
            self.build_step = Some(BuildStep::MountDirCreated);
        }

        if self.build_reached(BuildStep::MountDirCreated)
            && !self.teardown_reached(TeardownStep::MountDirRemoved)
        {
            tools.remove_mount_dir(&dir).await?;
            self.teardown_step = Some(TeardownStep::MountDirRemoved);
            self.build_step = Some(BuildStep::Formatted);
            self.mount_point.clear();
        }

        if array_present {
            if !self.teardown_reached(TeardownStep::ArrayRemoved) {
                tools.remove_array(&self.array_device).await?;
                self.teardown_step = Some(TeardownStep::ArrayRemoved);
            }
            if !self.teardown_reached(TeardownStep::ArrayStopped) {
                tools.stop_array(&self.array_device).await?;
                self.teardown_step = Some(TeardownStep::ArrayStopped);
                self.build_step = None;
            }
            if !self.teardown_reached(TeardownStep::SuperblocksZeroed) {
                tools.zero_superblocks(&self.member_paths()).await?;
            }
        } else {
            debug!("Pool {} has no array, skipping array teardown", self.uuid);
        }

        self.teardown_step = Some(TeardownStep::SuperblocksZeroed);
        self.mount_point.clear();
        self.build_step = None;
        Ok(())
    }
}
