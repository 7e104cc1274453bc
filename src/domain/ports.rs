//! Domain Ports - Core trait definitions for the pool manager
//!
//! These traits define the boundaries between the domain logic and the host:
//! device enumeration, external process execution, and durable state.
//! Adapters implement these traits to provide concrete functionality.

use crate::domain::drive::{AdoptedDrive, DriveInfo, DriveKey};
use crate::error::Result;
use crate::pool::{PoolStatus, PoolType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Device Scanner
// =============================================================================

/// Enumerates block devices present on the host
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Take a fresh snapshot of every eligible block device
    async fn scan(&self) -> Result<Vec<DriveInfo>>;
}

// =============================================================================
// Command Runner
// =============================================================================

/// An external command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes external processes
///
/// `run` returns `Err` only when the process could not be spawned or timed
/// out. A non-zero exit is reported through [`CommandOutput`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` resolves on the search path
    fn has_program(&self, program: &str) -> bool;
}

// =============================================================================
// State Store
// =============================================================================

/// Persisted form of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRecord {
    pub uuid: Uuid,
    pub name: String,
    pub mount_point: String,
    pub array_device: String,
    pub status: PoolStatus,
    pub pool_type: PoolType,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted form of an adoption, keyed by its drive key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRecord {
    pub kind: String,
    pub value: String,
    pub uuid: Uuid,
    pub pool_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl DriveRecord {
    pub fn key(&self) -> DriveKey {
        DriveKey::new(self.kind.clone(), self.value.clone())
    }
}

impl From<&AdoptedDrive> for DriveRecord {
    fn from(drive: &AdoptedDrive) -> Self {
        Self {
            kind: drive.key().kind.clone(),
            value: drive.key().value.clone(),
            uuid: drive.uuid,
            pool_id: drive.pool_id,
            created_at: drive.created_at,
        }
    }
}

/// Durable pool and adoption state
///
/// Implementations enforce uniqueness of pool names, array devices and
/// drive uuids, and clear `pool_id` on drives when their pool is deleted.
pub trait StateStore: Send + Sync {
    fn load_pools(&self) -> Result<Vec<PoolRecord>>;

    /// Insert or replace a pool keyed by uuid
    fn save_pool(&self, pool: &PoolRecord) -> Result<()>;

    fn delete_pool(&self, uuid: Uuid) -> Result<()>;

    /// All adoption records, newest first
    fn load_drives(&self) -> Result<Vec<DriveRecord>>;

    /// Insert a new adoption; fails if the key or uuid is already present
    fn insert_drive(&self, drive: &DriveRecord) -> Result<()>;

    fn set_drive_pool(&self, uuid: Uuid, pool_id: Option<Uuid>) -> Result<()>;

    fn delete_drive(&self, uuid: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display() {
        let cmd = CommandSpec::new(
            "mdadm",
            ["--stop", "/dev/md/0123456789abcdef"],
            Duration::from_secs(5),
        );
        assert_eq!(cmd.to_string(), "mdadm --stop /dev/md/0123456789abcdef");
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let killed = CommandOutput::default();
        assert!(!killed.success());
    }
}
