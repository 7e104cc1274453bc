//! Error types for the Storage Pool Manager
//!
//! One error enum covers drive adoption, pool lifecycle, host tooling and
//! persistence. Each variant belongs to an [`ErrorKind`], which the REST layer
//! maps onto an HTTP status class.

use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Drive Errors
    // =========================================================================
    #[error("drive not found: {key}")]
    DriveNotFound { key: String },

    #[error("drive already adopted: {key}")]
    AlreadyAdopted { key: String },

    #[error("drive not found or already in use: {uuid}")]
    DriveNotFoundOrInUse { uuid: Uuid },

    #[error("duplicate drive key found: {uuid}")]
    DuplicateDriveKey { uuid: Uuid },

    #[error("invalid drive key {0:?}: expected kind:value")]
    InvalidDriveKey(String),

    #[error("no drives to remove")]
    NoDrivesToRemove,

    // =========================================================================
    // Pool Errors
    // =========================================================================
    #[error("pool not found: {uuid}")]
    PoolNotFound { uuid: Uuid },

    #[error("pool with the same UUID already exists: {uuid}")]
    PoolAlreadyExists { uuid: Uuid },

    #[error("pool name already taken: {name}")]
    PoolNameTaken { name: String },

    #[error("cannot delete a pool that is not offline (status: {status})")]
    PoolNotOffline { status: String },

    #[error("pool is currently in use: {uuid}")]
    PoolInUse { uuid: Uuid },

    #[error("pool is already built and mounted at {mount_point}")]
    PoolAlreadyBuilt { mount_point: String },

    #[error("{}", insufficient_drives_message(.level, .count))]
    InsufficientDrives { level: u32, count: usize },

    #[error("unsupported raid level: {0}")]
    UnsupportedRaidLevel(String),

    #[error("invalid pool type: {0}")]
    InvalidPoolType(String),

    #[error("pool type {0} is not implemented")]
    PoolTypeNotImplemented(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("unsupported pool format: {0}")]
    UnsupportedFormat(String),

    #[error("pool format must be specified")]
    PoolFormatRequired,

    #[error("invalid raid name {0:?}")]
    InvalidPoolName(String),

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("invalid request body: {0}")]
    InvalidRequestBody(String),

    #[error("invalid uuid: {0:?}")]
    InvalidUuid(String),

    // =========================================================================
    // Host Tooling Errors
    // =========================================================================
    #[error("supported package manager not found")]
    PackageManagerMissing,

    #[error("failed to install {tool} with {manager}: {output}")]
    ToolInstallFailed {
        tool: String,
        manager: String,
        output: String,
    },

    #[error("{tool} installation verification failed")]
    ToolInstallUnverified { tool: String },

    #[error("mdadm command failed: {0}")]
    ArrayBuildFailed(CommandFailure),

    #[error("failed to format raid device: {0}")]
    FormatFailed(CommandFailure),

    #[error("failed to create mount point: {0}")]
    MountDirCreateFailed(CommandFailure),

    #[error("failed to mount raid device: {0}")]
    MountFailed(CommandFailure),

    #[error("failed to unmount raid device: {0}")]
    UnmountFailed(CommandFailure),

    #[error("failed to remove mount point: {0}")]
    MountDirRemoveFailed(CommandFailure),

    #[error("failed to remove raid device: {0}")]
    ArrayRemoveFailed(CommandFailure),

    #[error("failed to stop raid device: {0}")]
    ArrayStopFailed(CommandFailure),

    #[error("failed to zero raid superblocks: {0}")]
    SuperblockZeroFailed(CommandFailure),

    #[error("failed to read capacity: {0}")]
    CapacityReadFailed(CommandFailure),

    #[error("failed to parse capacity: {0}")]
    CapacityParseFailed(String),

    #[error("command timed out after {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },

    #[error("failed to spawn {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of an external command that exited unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    /// `None` when the command never exited on its own
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailure {
    /// A command that could not be started or did not finish in time
    pub fn unfinished(command: String, reason: String) -> Self {
        Self {
            command,
            code: None,
            stdout: String::new(),
            stderr: reason,
        }
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "`{}` exited with {}", self.command, code)?,
            None => write!(f, "`{}` did not exit normally", self.command)?,
        }
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            write!(f, "; stderr: {}", stderr)?;
        }
        if !stdout.is_empty() {
            write!(f, "; stdout: {}", stdout)?;
        }
        Ok(())
    }
}

fn insufficient_drives_message(level: &u32, count: &usize) -> String {
    match *level {
        10 => format!(
            "raid10 requires at least 4 drives and an even number of drives (got {})",
            count
        ),
        _ => {
            let min = match *level {
                5 => 3,
                6 => 4,
                _ => 2,
            };
            format!("raid{} requires at least {} drives (got {})", level, min, count)
        }
    }
}

/// Coarse classification of an error, independent of its variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    /// An external tool or OS call failed mid-protocol
    Infrastructure,
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DriveNotFound { .. } | Error::PoolNotFound { .. } => ErrorKind::NotFound,

            Error::AlreadyAdopted { .. }
            | Error::DriveNotFoundOrInUse { .. }
            | Error::DuplicateDriveKey { .. }
            | Error::PoolAlreadyExists { .. }
            | Error::PoolNameTaken { .. }
            | Error::PoolNotOffline { .. }
            | Error::PoolInUse { .. }
            | Error::PoolAlreadyBuilt { .. } => ErrorKind::Conflict,

            Error::InsufficientDrives { .. }
            | Error::UnsupportedRaidLevel(_)
            | Error::InvalidPoolType(_)
            | Error::PoolTypeNotImplemented(_)
            | Error::InvalidStatus(_)
            | Error::UnsupportedFormat(_)
            | Error::PoolFormatRequired
            | Error::InvalidPoolName(_)
            | Error::InvalidDriveKey(_)
            | Error::InvalidRequestBody(_)
            | Error::InvalidUuid(_)
            | Error::NoDrivesToRemove => ErrorKind::Validation,

            Error::PackageManagerMissing
            | Error::ToolInstallFailed { .. }
            | Error::ToolInstallUnverified { .. }
            | Error::ArrayBuildFailed(_)
            | Error::FormatFailed(_)
            | Error::MountDirCreateFailed(_)
            | Error::MountFailed(_)
            | Error::UnmountFailed(_)
            | Error::MountDirRemoveFailed(_)
            | Error::ArrayRemoveFailed(_)
            | Error::ArrayStopFailed(_)
            | Error::SuperblockZeroFailed(_)
            | Error::CapacityReadFailed(_)
            | Error::CapacityParseFailed(_)
            | Error::CommandTimeout { .. }
            | Error::CommandSpawn { .. } => ErrorKind::Infrastructure,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::Store(_)
            | Error::Json(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for the manager
pub type Result<T> = std::result::Result<T, Error>;
