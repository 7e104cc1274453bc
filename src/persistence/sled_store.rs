//! Sled State Store
//!
//! Two trees hold JSON-encoded records: `pools` keyed by pool uuid and
//! `drives` keyed by `kind \0 value`. Writers are serialized so the
//! uniqueness and reference checks see a stable view.

use crate::domain::ports::{DriveRecord, PoolRecord, StateStore};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const POOLS_TREE: &str = "pools";
const DRIVES_TREE: &str = "drives";

pub struct SledStore {
    db: sled::Db,
    pools: sled::Tree,
    drives: sled::Tree,
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening state store at {}", path.display());
        Self::new(sled::open(path)?)
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    pub fn new(db: sled::Db) -> Result<Self> {
        let pools = db.open_tree(POOLS_TREE)?;
        let drives = db.open_tree(DRIVES_TREE)?;
        Ok(Self {
            db,
            pools,
            drives,
            write_lock: Mutex::new(()),
        })
    }

    fn drive_key(kind: &str, value: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(kind.len() + value.len() + 1);
        key.extend_from_slice(kind.as_bytes());
        key.push(0);
        key.extend_from_slice(value.as_bytes());
        key
    }

    fn decode_all<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
        tree.iter()
            .map(|entry| {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn put_drive(&self, drive: &DriveRecord) -> Result<()> {
        let key = Self::drive_key(&drive.kind, &drive.value);
        self.drives.insert(key, serde_json::to_vec(drive)?)?;
        Ok(())
    }

    fn find_drive(&self, uuid: Uuid) -> Result<Option<DriveRecord>> {
        Ok(Self::decode_all::<DriveRecord>(&self.drives)?
            .into_iter()
            .find(|d| d.uuid == uuid))
    }

    fn pool_exists(&self, uuid: Uuid) -> Result<bool> {
        Ok(self.pools.contains_key(uuid.as_bytes())?)
    }
}

impl StateStore for SledStore {
    fn load_pools(&self) -> Result<Vec<PoolRecord>> {
        let mut pools: Vec<PoolRecord> = Self::decode_all(&self.pools)?;
        pools.sort_by_key(|p| p.created_at);
        Ok(pools)
    }

    fn save_pool(&self, pool: &PoolRecord) -> Result<()> {
        let _guard = self.write_lock.lock();

        for existing in Self::decode_all::<PoolRecord>(&self.pools)? {
            if existing.uuid == pool.uuid {
                continue;
            }
            if existing.name == pool.name {
                return Err(Error::PoolNameTaken {
                    name: pool.name.clone(),
                });
            }
            if existing.array_device == pool.array_device {
                return Err(Error::PoolAlreadyExists { uuid: pool.uuid });
            }
        }

        self.pools
            .insert(pool.uuid.as_bytes(), serde_json::to_vec(pool)?)?;
        self.db.flush()?;
        debug!("Saved pool {} ({})", pool.name, pool.uuid);
        Ok(())
    }

    fn delete_pool(&self, uuid: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut released = Vec::new();
        for mut drive in Self::decode_all::<DriveRecord>(&self.drives)? {
            if drive.pool_id == Some(uuid) {
                drive.pool_id = None;
                let key = Self::drive_key(&drive.kind, &drive.value);
                released.push((key, serde_json::to_vec(&drive)?));
            }
        }

        // The pool row and its drives' references go together
        let result: TransactionResult<()> =
            (&self.pools, &self.drives).transaction(|(pools, drives)| {
                pools.remove(&uuid.as_bytes()[..])?;
                for (key, value) in &released {
                    drives.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            });
        result.map_err(|e| match e {
            TransactionError::Storage(e) => Error::Store(e),
            TransactionError::Abort(()) => Error::Internal(format!("delete of pool {} aborted", uuid)),
        })?;

        self.db.flush()?;
        debug!("Deleted pool {} and released {} drives", uuid, released.len());
        Ok(())
    }

    fn load_drives(&self) -> Result<Vec<DriveRecord>> {
        let mut drives: Vec<DriveRecord> = Self::decode_all(&self.drives)?;
        drives.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(drives)
    }

    fn insert_drive(&self, drive: &DriveRecord) -> Result<()> {
        let _guard = self.write_lock.lock();

        let key = Self::drive_key(&drive.kind, &drive.value);
        if self.drives.contains_key(&key)? || self.find_drive(drive.uuid)?.is_some() {
            return Err(Error::AlreadyAdopted {
                key: drive.key().to_string(),
            });
        }
        if let Some(pool_id) = drive.pool_id {
            if !self.pool_exists(pool_id)? {
                return Err(Error::PoolNotFound { uuid: pool_id });
            }
        }

        self.put_drive(drive)?;
        self.db.flush()?;
        Ok(())
    }

    fn set_drive_pool(&self, uuid: Uuid, pool_id: Option<Uuid>) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(pool_id) = pool_id {
            if !self.pool_exists(pool_id)? {
                return Err(Error::PoolNotFound { uuid: pool_id });
            }
        }
        let mut drive = self
            .find_drive(uuid)?
            .ok_or(Error::DriveNotFoundOrInUse { uuid })?;
        drive.pool_id = pool_id;

        self.put_drive(&drive)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete_drive(&self, uuid: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();

        let drive = self
            .find_drive(uuid)?
            .ok_or(Error::DriveNotFoundOrInUse { uuid })?;
        self.drives
            .remove(Self::drive_key(&drive.kind, &drive.value))?;
        self.db.flush()?;
        Ok(())
    }
}
