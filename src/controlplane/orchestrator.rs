//! Main Orchestrator
//!
//! Coordinates every pool manager operation:
//! - Startup reconciliation of persisted state against the scanned host
//! - Drive adoption and release
//! - Pool creation, build, patch and teardown
//!
//! Protocols that run external commands follow reserve / run / commit:
//! the pool is marked busy under the registry lock, the commands run on a
//! clone with no lock held, and the result is written back under the lock.

use crate::domain::drive::{AdoptedDrive, DriveInfo, DriveKey};
use crate::domain::ports::{CommandRunner, DeviceScanner, DriveRecord, StateStore};
use crate::error::{Error, Result};
use crate::hardware::discovery::{DriveFilter, DEFAULT_MIN_DRIVE_SIZE};
use crate::hardware::registry::AdoptionLedger;
use crate::pool::{
    sanitize_name, Pool, PoolPatch, PoolStatus, PoolType, Pools, RaidLevel,
};
use crate::system::{validate_format, HostTools, ToolsConfig};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Host tool settings
    pub tools: ToolsConfig,
    /// Drives smaller than this are hidden from the system view
    pub min_drive_size: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            min_drive_size: DEFAULT_MIN_DRIVE_SIZE,
        }
    }
}

/// Write a protocol run's pool back, keeping drives a rescan attached to the
/// live entry while the run held no lock
fn commit_run(pools: &mut Pools, mut pool: Pool) -> Result<Pool> {
    let attached: Vec<AdoptedDrive> = pools
        .get(pool.uuid)?
        .adopted_drives
        .values()
        .filter(|d| !pool.adopted_drives.contains_key(&d.uuid))
        .cloned()
        .collect();
    if !attached.is_empty() {
        debug!("Keeping {} drives attached to pool {} during the run", attached.len(), pool.uuid);
        pool.add_drives(attached);
    }
    pools.replace(pool.clone())?;
    Ok(pool)
}

// =============================================================================
// Requests
// =============================================================================

/// Body of a pool creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    pub name: String,
    pub raid_level: i64,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub drives: Vec<Uuid>,
    /// Run the build protocol right after creation
    #[serde(default)]
    pub build: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Application context owning the ledger, the pool registry and the host ports
pub struct Orchestrator {
    config: OrchestratorConfig,
    scanner: Arc<dyn DeviceScanner>,
    store: Arc<dyn StateStore>,
    tools: HostTools,
    ledger: AdoptionLedger,
    pools: RwLock<Pools>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        scanner: Arc<dyn DeviceScanner>,
        store: Arc<dyn StateStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Arc<Self> {
        let tools = HostTools::new(runner, config.tools.clone());

        Arc::new(Self {
            config,
            scanner,
            store,
            tools,
            ledger: AdoptionLedger::new(),
            pools: RwLock::new(Pools::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Rebuild in-memory state from the store and a fresh scan
    pub async fn reconcile(&self) -> Result<()> {
        info!("Reconciling persisted state with host");

        let drives = self.scanner.scan().await?;
        self.ledger.reset_claims();
        self.ledger.refresh(drives);

        let mut pools = Pools::new();
        for record in self.store.load_pools()? {
            pools.add(Pool::from_record(record, Vec::new()))?;
        }
        let bound = self.bind_records(&mut pools)?;
        let pool_count = pools.len();
        *self.pools.write() = pools;

        self.refresh_capacity().await;

        let stats = self.ledger.stats();
        info!(
            "Reconciled {} pools, {} live adoptions ({} free), {} drives scanned",
            pool_count, bound, stats.free, stats.scanned
        );
        Ok(())
    }

    /// Attach persisted adoptions whose drive is present and not yet live
    fn bind_records(&self, pools: &mut Pools) -> Result<usize> {
        let mut bound = 0;

        for record in self.store.load_drives()? {
            let key = record.key();
            if self.ledger.is_claimed(&key) {
                continue;
            }
            let Some(drive) = self.ledger.scanned(&key) else {
                warn!(
                    "Adopted drive {} ({}) not found on host, leaving it out",
                    key, record.uuid
                );
                continue;
            };

            let adopted = adopted_from_record(&record, drive);
            match record.pool_id {
                Some(pool_id) => match pools.get_mut(pool_id) {
                    Ok(pool) => {
                        self.ledger.claim_bound(&adopted);
                        pool.add_drives([adopted]);
                    }
                    Err(_) => {
                        warn!(
                            "Drive {} references missing pool {}, returning it to the free set",
                            record.uuid, pool_id
                        );
                        self.store.set_drive_pool(record.uuid, None)?;
                        self.ledger.restore([adopted]);
                    }
                },
                None => self.ledger.restore([adopted]),
            }
            bound += 1;
        }

        Ok(bound)
    }

    /// Re-read filesystem usage of every mounted pool
    async fn refresh_capacity(&self) {
        let mounted: Vec<Pool> = self
            .pools
            .read()
            .list()
            .into_iter()
            .filter(Pool::is_built)
            .collect();
        if mounted.is_empty() {
            return;
        }

        let results = join_all(mounted.iter().map(|pool| pool.query_capacity(&self.tools))).await;

        let mut pools = self.pools.write();
        for (pool, result) in mounted.iter().zip(results) {
            match result {
                Ok(capacity) => {
                    if let Ok(live) = pools.get_mut(pool.uuid) {
                        live.set_capacity(capacity);
                    }
                }
                Err(e) => warn!("Capacity refresh for pool {} failed: {}", pool.name, e),
            }
        }
    }

    // =========================================================================
    // Drives
    // =========================================================================

    /// Scan again and return the system drive view
    pub async fn rescan(&self) -> Result<Vec<DriveInfo>> {
        let drives = self.scanner.scan().await?;
        self.ledger.refresh(drives);

        let bound = {
            let mut pools = self.pools.write();
            self.bind_records(&mut pools)?
        };
        if bound > 0 {
            info!("Rescan brought {} adopted drives back", bound);
        }

        Ok(self.system_drives())
    }

    /// Latest scan, without devices below the configured minimum size
    pub fn system_drives(&self) -> Vec<DriveInfo> {
        DriveFilter::system(self.config.min_drive_size).apply(self.ledger.snapshot())
    }

    /// Adoptions not bound to any pool, newest first
    pub fn free_drives(&self) -> Vec<AdoptedDrive> {
        self.ledger.free_drives()
    }

    /// Adopt the scanned drive identified by `key` (`kind:value`)
    pub fn adopt(&self, key: &str) -> Result<AdoptedDrive> {
        let key = DriveKey::parse(key)?;
        self.ledger
            .adopt(&key, |drive| self.store.insert_drive(&DriveRecord::from(drive)))
    }

    /// Forget a free adoption
    pub fn unadopt(&self, uuid: Uuid) -> Result<AdoptedDrive> {
        self.ledger
            .unadopt(uuid, |drive| self.store.delete_drive(drive.uuid))
    }

    // =========================================================================
    // Pools
    // =========================================================================

    pub fn pools(&self) -> Vec<Pool> {
        self.pools.read().list()
    }

    pub fn pool(&self, uuid: Uuid) -> Result<Pool> {
        self.pools.read().get(uuid).cloned()
    }

    /// Create a pool from free adoptions, optionally building it
    pub async fn create_pool(&self, request: CreatePoolRequest) -> Result<Pool> {
        let pool_type = PoolType::Raid(RaidLevel::try_from(request.raid_level)?);
        let format = request.format.trim();
        if !format.is_empty() {
            validate_format(format)?;
        }
        let name = sanitize_name(&request.name)?;
        if self.pools.read().list().iter().any(|p| p.name == name) {
            return Err(Error::PoolNameTaken { name });
        }

        let drives = self.ledger.take_free(&request.drives)?;
        let pool = match Pool::new(&name, pool_type, format, drives.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                self.ledger.restore(drives);
                return Err(e);
            }
        };

        if let Err(e) = self.persist_new_pool(&pool) {
            self.ledger.restore(drives);
            return Err(e);
        }
        let registered = self.pools.write().add(pool.clone());
        if let Err(e) = registered {
            self.discard_pool_row(pool.uuid);
            self.ledger.restore(drives);
            return Err(e);
        }

        info!(
            "Created {} pool {} ({}) with {} drives",
            pool.pool_type,
            pool.name,
            pool.uuid,
            pool.adopted_drives.len()
        );

        if request.build {
            return self.build_pool(pool.uuid).await;
        }
        Ok(pool)
    }

    fn persist_new_pool(&self, pool: &Pool) -> Result<()> {
        self.store.save_pool(&pool.to_record())?;
        for uuid in pool.adopted_drives.keys() {
            if let Err(e) = self.store.set_drive_pool(*uuid, Some(pool.uuid)) {
                self.discard_pool_row(pool.uuid);
                return Err(e);
            }
        }
        Ok(())
    }

    fn discard_pool_row(&self, uuid: Uuid) {
        if let Err(e) = self.store.delete_pool(uuid) {
            error!("Failed to discard pool row {}: {}", uuid, e);
        }
    }

    /// Build a registered pool
    pub async fn build_pool(&self, uuid: Uuid) -> Result<Pool> {
        let mut pool = {
            let mut pools = self.pools.write();
            if pools.is_busy(uuid) {
                return Err(Error::PoolInUse { uuid });
            }
            let pool = pools.get(uuid)?;
            if pool.is_built() {
                return Err(Error::PoolAlreadyBuilt {
                    mount_point: pool.mount_point.clone(),
                });
            }
            let pool = pool.clone();
            pools.mark_busy(uuid)?;
            pool
        };

        let pool_type = pool.pool_type;
        let result = pool_type.build(&mut pool, &self.tools).await;

        let mut pools = self.pools.write();
        pools.clear_busy(uuid);
        let pool = commit_run(&mut pools, pool)?;

        if let Err(e) = result {
            error!("Build of pool {} failed: {}", pool.name, e);
            return Err(e);
        }
        self.store.save_pool(&pool.to_record())?;
        Ok(pool)
    }

    /// Tear down and remove an offline pool, returning its drives to the free set
    pub async fn delete_pool(&self, uuid: Uuid) -> Result<()> {
        let mut pool = {
            let mut pools = self.pools.write();
            let pool = pools.get(uuid)?;
            if pool.status != PoolStatus::Offline {
                return Err(Error::PoolNotOffline {
                    status: pool.status.to_string(),
                });
            }
            let pool = pool.clone();
            pools.mark_busy(uuid)?;
            pool
        };

        let result = pool.teardown(&self.tools).await;

        let mut pools = self.pools.write();
        if let Err(e) = result {
            error!("Teardown of pool {} failed: {}", pool.name, e);
            pools.clear_busy(uuid);
            let pool = commit_run(&mut pools, pool)?;
            if let Err(save_err) = self.store.save_pool(&pool.to_record()) {
                warn!("Failed to record teardown progress of pool {}: {}", pool.name, save_err);
            }
            return Err(e);
        }
        if let Err(e) = self.store.delete_pool(uuid) {
            pools.clear_busy(uuid);
            commit_run(&mut pools, pool)?;
            return Err(e);
        }
        let removed = pools.remove(uuid)?;
        drop(pools);

        debug!("Returning {} drives to the free set", removed.adopted_drives.len());
        self.ledger.restore(removed.adopted_drives.into_values());
        info!("Deleted pool {} ({})", pool.name, uuid);
        Ok(())
    }

    /// Rename a pool or change its status or format
    pub fn patch_pool(&self, uuid: Uuid, patch: &PoolPatch) -> Result<Pool> {
        let patch = patch.validate()?;

        let mut pools = self.pools.write();
        if pools.is_busy(uuid) {
            return Err(Error::PoolInUse { uuid });
        }
        let current = pools.get(uuid)?;
        if patch.is_empty() {
            return Ok(current.clone());
        }

        let patched = patch.apply(current);
        if pools
            .list()
            .iter()
            .any(|p| p.uuid != uuid && p.name == patched.name)
        {
            return Err(Error::PoolNameTaken { name: patched.name });
        }

        self.store.save_pool(&patched.to_record())?;
        pools.replace(patched.clone())?;
        info!("Patched pool {} ({})", patched.name, uuid);
        Ok(patched)
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn status(&self) -> OrchestratorStatus {
        let ledger = self.ledger.stats();
        let pools = self.pools.read();
        let listed = pools.list();

        OrchestratorStatus {
            healthy: true,
            pool_count: listed.len() as u64,
            built_pools: listed.iter().filter(|p| p.is_built()).count() as u64,
            scanned_drives: ledger.scanned as u64,
            adopted_drives: ledger.claimed as u64,
            free_drives: ledger.free as u64,
        }
    }
}

fn adopted_from_record(record: &DriveRecord, mut drive: DriveInfo) -> AdoptedDrive {
    drive.uuid = Some(record.uuid);
    AdoptedDrive {
        drive,
        uuid: record.uuid,
        pool_id: record.pool_id,
        created_at: record.created_at,
    }
}

/// Orchestrator status summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub pool_count: u64,
    pub built_pools: u64,
    pub scanned_drives: u64,
    pub adopted_drives: u64,
    pub free_drives: u64,
}
