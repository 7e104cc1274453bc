//! Storage Pool Manager
//!
//! Drive adoption and software RAID pool orchestration for a single
//! storage host.
//!
//! Block devices are discovered through sysfs and given a stable key.
//! An operator adopts drives by key, groups free adoptions into pools,
//! and builds each pool into an mdadm array that is formatted and mounted
//! under the mount base. Pool and adoption records live in an embedded
//! store and are reconciled against the host on startup.
//!
//! # Modules
//!
//! - [`controlplane`]: Orchestrator and REST API
//! - [`hardware`]: Drive discovery, identity and the adoption ledger
//! - [`pool`]: Pool values, RAID build strategy and registry
//! - [`persistence`]: Durable state store
//! - [`system`]: Host tool invocation
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod persistence;
pub mod pool;
pub mod system;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, CreatePoolRequest, Orchestrator, OrchestratorConfig,
    OrchestratorStatus, RestRouter,
};

pub use domain::drive::{AdoptedDrive, DeviceType, DriveInfo, DriveKey, PartitionInfo};

pub use domain::ports::{
    CommandOutput, CommandRunner, CommandSpec, DeviceScanner, DriveRecord, PoolRecord, StateStore,
};

pub use error::{Error, ErrorKind, Result};

pub use hardware::{derive_key, AdoptionLedger, DriveFilter, ScannerConfig, SysfsScanner};

pub use persistence::SledStore;

pub use pool::{Pool, PoolPatch, PoolStatus, PoolType, Pools, RaidLevel};

pub use system::{Capacity, HostTools, SystemCommandRunner, ToolsConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
