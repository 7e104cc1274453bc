//! Pool Registry
//!
//! In-memory map of pools plus the set of pools with a protocol in flight.

use super::lifecycle::Pool;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Pools {
    pools: HashMap<Uuid, Pool>,
    busy: HashSet<Uuid>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pool: Pool) -> Result<()> {
        if self.pools.contains_key(&pool.uuid) {
            return Err(Error::PoolAlreadyExists { uuid: pool.uuid });
        }
        self.pools.insert(pool.uuid, pool);
        Ok(())
    }

    pub fn get(&self, uuid: Uuid) -> Result<&Pool> {
        self.pools.get(&uuid).ok_or(Error::PoolNotFound { uuid })
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Result<&mut Pool> {
        self.pools.get_mut(&uuid).ok_or(Error::PoolNotFound { uuid })
    }

    pub fn remove(&mut self, uuid: Uuid) -> Result<Pool> {
        self.busy.remove(&uuid);
        self.pools.remove(&uuid).ok_or(Error::PoolNotFound { uuid })
    }

    /// Replace a registered pool with an updated value
    pub fn replace(&mut self, pool: Pool) -> Result<()> {
        let slot = self.get_mut(pool.uuid)?;
        *slot = pool;
        Ok(())
    }

    /// All pools, oldest first
    pub fn list(&self) -> Vec<Pool> {
        let mut pools: Vec<Pool> = self.pools.values().cloned().collect();
        pools.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Reserve a pool for a protocol run
    pub fn mark_busy(&mut self, uuid: Uuid) -> Result<()> {
        if !self.busy.insert(uuid) {
            return Err(Error::PoolInUse { uuid });
        }
        Ok(())
    }

    pub fn clear_busy(&mut self, uuid: Uuid) {
        self.busy.remove(&uuid);
    }

    pub fn is_busy(&self, uuid: Uuid) -> bool {
        self.busy.contains(&uuid)
    }
}
