//! RAID Strategy
//!
//! `PoolType` is a closed set of build strategies. Only software RAID
//! through mdadm is implemented; `standard` and `mirrored` are reserved and
//! refuse to build.

use super::lifecycle::{BuildStep, Pool};
use super::status::PoolStatus;
use crate::error::{Error, Result};
use crate::system::HostTools;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

// =============================================================================
// RAID Level
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    /// Level number as passed to `mdadm --level`
    pub fn number(self) -> u32 {
        match self {
            RaidLevel::Raid0 => 0,
            RaidLevel::Raid1 => 1,
            RaidLevel::Raid5 => 5,
            RaidLevel::Raid6 => 6,
            RaidLevel::Raid10 => 10,
        }
    }

    pub fn min_members(self) -> usize {
        match self {
            RaidLevel::Raid0 | RaidLevel::Raid1 => 2,
            RaidLevel::Raid5 => 3,
            RaidLevel::Raid6 | RaidLevel::Raid10 => 4,
        }
    }

    /// Check a member count against this level's constraints
    pub fn check_members(self, count: usize) -> Result<()> {
        let even_ok = self != RaidLevel::Raid10 || count % 2 == 0;
        if count >= self.min_members() && even_ok {
            Ok(())
        } else {
            Err(Error::InsufficientDrives {
                level: self.number(),
                count,
            })
        }
    }
}

impl TryFrom<u32> for RaidLevel {
    type Error = Error;

    fn try_from(level: u32) -> Result<Self> {
        match level {
            0 => Ok(RaidLevel::Raid0),
            1 => Ok(RaidLevel::Raid1),
            5 => Ok(RaidLevel::Raid5),
            6 => Ok(RaidLevel::Raid6),
            10 => Ok(RaidLevel::Raid10),
            other => Err(Error::UnsupportedRaidLevel(other.to_string())),
        }
    }
}

impl TryFrom<i64> for RaidLevel {
    type Error = Error;

    fn try_from(level: i64) -> Result<Self> {
        u32::try_from(level)
            .map_err(|_| Error::UnsupportedRaidLevel(level.to_string()))?
            .try_into()
    }
}

// =============================================================================
// Pool Type
// =============================================================================

/// Build strategy of a pool, stored as `raid0`..`raid10`, `standard` or `mirrored`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PoolType {
    Raid(RaidLevel),
    Standard,
    Mirrored,
}

impl PoolType {
    /// Run the build protocol for `pool`
    ///
    /// Validation happens before any command runs. Steps already recorded on
    /// the pool are skipped, so a failed build can be retried. Nothing is
    /// rolled back on failure.
    pub async fn build(self, pool: &mut Pool, tools: &HostTools) -> Result<()> {
        match self {
            PoolType::Raid(level) => build_raid(level, pool, tools).await,
            PoolType::Standard | PoolType::Mirrored => {
                Err(Error::PoolTypeNotImplemented(self.to_string()))
            }
        }
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolType::Raid(level) => write!(f, "raid{}", level.number()),
            PoolType::Standard => write!(f, "standard"),
            PoolType::Mirrored => write!(f, "mirrored"),
        }
    }
}

impl FromStr for PoolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "standard" => Ok(PoolType::Standard),
            "mirrored" => Ok(PoolType::Mirrored),
            _ => lower
                .strip_prefix("raid")
                .and_then(|n| n.parse::<u32>().ok())
                .and_then(|n| RaidLevel::try_from(n).ok())
                .map(PoolType::Raid)
                .ok_or_else(|| Error::InvalidPoolType(s.to_string())),
        }
    }
}

impl TryFrom<String> for PoolType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PoolType> for String {
    fn from(t: PoolType) -> Self {
        t.to_string()
    }
}

// =============================================================================
// RAID Build Protocol
// =============================================================================

async fn build_raid(level: RaidLevel, pool: &mut Pool, tools: &HostTools) -> Result<()> {
    level.check_members(pool.adopted_drives.len())?;
    if pool.format.is_empty() {
        return Err(Error::PoolFormatRequired);
    }

    let members = pool.member_paths();
    let mount_dir = tools.mount_dir(pool.uuid);

    // Teardown progress only describes the state before this build
    pool.teardown_step = None;

    if !pool.build_reached(BuildStep::ArrayCreated) {
        info!(
            "Creating raid{} array {} for pool {} from {} drives",
            level.number(),
            pool.array_device,
            pool.name,
            members.len()
        );
        tools
            .create_array(&pool.array_device, level.number(), &pool.name, &members)
            .await?;
        pool.build_step = Some(BuildStep::ArrayCreated);
    }

    if !pool.build_reached(BuildStep::Formatted) {
        info!("Formatting {} as {}", pool.array_device, pool.format);
        tools.make_filesystem(&pool.format, &pool.array_device).await?;
        pool.build_step = Some(BuildStep::Formatted);
    }

    if !pool.build_reached(BuildStep::MountDirCreated) {
        tools.create_mount_dir(&mount_dir).await?;
        pool.build_step = Some(BuildStep::MountDirCreated);
    }

    if !pool.build_reached(BuildStep::Mounted) {
        tools.mount(&pool.array_device, &mount_dir).await?;
        pool.build_step = Some(BuildStep::Mounted);
    }

    pool.mount_point = mount_dir.to_string_lossy().into_owned();
    pool.status = PoolStatus::Healthy;
    info!("Pool {} mounted at {}", pool.name, pool.mount_point);

    match pool.query_capacity(tools).await {
        Ok(capacity) => pool.set_capacity(capacity),
        Err(e) => warn!("Capacity refresh for pool {} failed: {}", pool.name, e),
    }

    Ok(())
}
