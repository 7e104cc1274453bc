//! Adoption Ledger
//!
//! Holds the latest scan snapshot, the set of free adoptions, and the index
//! of every claimed drive key. A single mutex guards all three so that a
//! claim and its persistence happen atomically with respect to other claims.

use crate::domain::drive::{AdoptedDrive, DriveInfo, DriveKey};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// Ledger State
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    /// Latest scan, by key
    snapshot: HashMap<DriveKey, DriveInfo>,
    /// Adoptions not bound to any pool
    free: HashMap<Uuid, AdoptedDrive>,
    /// Every live claim, free or bound
    claimed: HashMap<DriveKey, Uuid>,
}

impl LedgerState {
    /// Claim `key` for `uuid` and mark the scanned drive with it
    fn stamp(&mut self, key: &DriveKey, uuid: Uuid) {
        self.claimed.insert(key.clone(), uuid);
        if let Some(scanned) = self.snapshot.get_mut(key) {
            scanned.uuid = Some(uuid);
        }
    }
}

/// Point-in-time ledger counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub scanned: usize,
    pub free: usize,
    pub claimed: usize,
    pub adoptions: u64,
}

// =============================================================================
// Adoption Ledger
// =============================================================================

#[derive(Debug, Default)]
pub struct AdoptionLedger {
    state: Mutex<LedgerState>,
    adoptions: AtomicU64,
}

impl AdoptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scan snapshot
    ///
    /// Claimed keys get their uuid stamped onto the fresh info, and free
    /// adoptions are rebound to it.
    pub fn refresh(&self, drives: Vec<DriveInfo>) {
        let mut state = self.state.lock();
        let LedgerState {
            snapshot,
            free,
            claimed,
        } = &mut *state;

        snapshot.clear();
        for mut drive in drives {
            drive.uuid = claimed.get(&drive.drive_key).copied();
            if let Some(adopted) = drive.uuid.and_then(|uuid| free.get_mut(&uuid)) {
                adopted.rebind(drive.clone());
            }
            snapshot.insert(drive.drive_key.clone(), drive);
        }
        debug!("Ledger snapshot refreshed: {} drives", snapshot.len());
    }

    /// Drop all claims, keeping the snapshot
    pub fn reset_claims(&self) {
        let mut state = self.state.lock();
        state.free.clear();
        state.claimed.clear();
    }

    /// Claim the scanned drive with `key`
    ///
    /// `persist` runs while the ledger is locked; if it fails nothing is
    /// recorded.
    pub fn adopt<F>(&self, key: &DriveKey, persist: F) -> Result<AdoptedDrive>
    where
        F: FnOnce(&AdoptedDrive) -> Result<()>,
    {
        let mut state = self.state.lock();

        if state.claimed.contains_key(key) {
            return Err(Error::AlreadyAdopted {
                key: key.to_string(),
            });
        }

        let drive = state
            .snapshot
            .get(key)
            .cloned()
            .ok_or_else(|| Error::DriveNotFound {
                key: key.to_string(),
            })?;

        let adopted = AdoptedDrive::mint(drive);
        persist(&adopted)?;

        if let Some(scanned) = state.snapshot.get_mut(key) {
            scanned.uuid = Some(adopted.uuid);
        }
        state.claimed.insert(key.clone(), adopted.uuid);
        state.free.insert(adopted.uuid, adopted.clone());
        self.adoptions.fetch_add(1, Ordering::Relaxed);

        info!("Adopted drive {} as {}", key, adopted.uuid);
        Ok(adopted)
    }

    /// Give up a free adoption entirely
    ///
    /// Bound drives are refused. `persist` runs while the ledger is locked.
    pub fn unadopt<F>(&self, uuid: Uuid, persist: F) -> Result<AdoptedDrive>
    where
        F: FnOnce(&AdoptedDrive) -> Result<()>,
    {
        let mut state = self.state.lock();

        let adopted = state
            .free
            .get(&uuid)
            .cloned()
            .ok_or(Error::DriveNotFoundOrInUse { uuid })?;
        persist(&adopted)?;

        state.free.remove(&uuid);
        state.claimed.remove(adopted.key());
        if let Some(scanned) = state.snapshot.get_mut(adopted.key()) {
            scanned.uuid = None;
        }

        info!("Released adoption {} of {}", uuid, adopted.key());
        Ok(adopted)
    }

    /// Remove adoptions from the free set, returning how many were present
    ///
    /// Their keys stay claimed.
    pub fn release(&self, uuids: &[Uuid]) -> usize {
        let mut state = self.state.lock();
        uuids
            .iter()
            .filter(|uuid| state.free.remove(*uuid).is_some())
            .count()
    }

    /// Take free adoptions out of the free set, all or nothing
    pub fn take_free(&self, uuids: &[Uuid]) -> Result<Vec<AdoptedDrive>> {
        let mut seen = HashSet::with_capacity(uuids.len());
        if let Some(dup) = uuids.iter().find(|uuid| !seen.insert(**uuid)) {
            return Err(Error::DuplicateDriveKey { uuid: *dup });
        }

        let mut state = self.state.lock();
        if let Some(missing) = uuids.iter().find(|uuid| !state.free.contains_key(*uuid)) {
            return Err(Error::DriveNotFoundOrInUse { uuid: *missing });
        }

        Ok(uuids
            .iter()
            .filter_map(|uuid| state.free.remove(uuid))
            .collect())
    }

    /// Put drives back into the free set, clearing their pool binding
    pub fn restore(&self, drives: impl IntoIterator<Item = AdoptedDrive>) {
        let mut state = self.state.lock();
        for mut drive in drives {
            drive.pool_id = None;
            state.stamp(drive.key(), drive.uuid);
            state.free.insert(drive.uuid, drive);
        }
    }

    /// Record a claim for a drive bound to a pool
    pub fn claim_bound(&self, drive: &AdoptedDrive) {
        self.state.lock().stamp(drive.key(), drive.uuid);
    }

    /// Free adoption with `key`
    pub fn lookup_by_key(&self, key: &DriveKey) -> Option<AdoptedDrive> {
        let state = self.state.lock();
        let uuid = state.claimed.get(key)?;
        state.free.get(uuid).cloned()
    }

    /// Free adoption with `uuid`
    pub fn lookup_by_uuid(&self, uuid: Uuid) -> Option<AdoptedDrive> {
        self.state.lock().free.get(&uuid).cloned()
    }

    pub fn is_claimed(&self, key: &DriveKey) -> bool {
        self.state.lock().claimed.contains_key(key)
    }

    /// Latest scan snapshot entry for `key`
    pub fn scanned(&self, key: &DriveKey) -> Option<DriveInfo> {
        self.state.lock().snapshot.get(key).cloned()
    }

    /// Latest scan, ordered by device name
    pub fn snapshot(&self) -> Vec<DriveInfo> {
        let mut drives: Vec<DriveInfo> = self.state.lock().snapshot.values().cloned().collect();
        drives.sort_by(|a, b| a.name.cmp(&b.name));
        drives
    }

    /// Free adoptions, newest first
    pub fn free_drives(&self) -> Vec<AdoptedDrive> {
        let mut drives: Vec<AdoptedDrive> = self.state.lock().free.values().cloned().collect();
        drives.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.uuid.cmp(&b.uuid)));
        drives
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state.lock();
        LedgerStats {
            scanned: state.snapshot.len(),
            free: state.free.len(),
            claimed: state.claimed.len(),
            adoptions: self.adoptions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::drive;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn ledger() -> AdoptionLedger {
        let ledger = AdoptionLedger::new();
        ledger.refresh(vec![
            drive("sdb", 500 << 30, 0),
            drive("sdc", 500 << 30, 0),
            drive("sdd", 1000 << 30, 0),
        ]);
        ledger
    }

    fn key(name: &str) -> DriveKey {
        DriveKey::new(DriveKey::SERIAL, format!("SN-{}", name))
    }

    #[test]
    fn test_adopt_once_per_key() {
        let ledger = ledger();

        let first = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();
        assert_eq!(first.drive.uuid, Some(first.uuid));
        assert_eq!(ledger.scanned(&key("sdb")).unwrap().uuid, Some(first.uuid));

        let second = ledger.adopt(&key("sdb"), |_| Ok(()));
        assert_matches!(second, Err(Error::AlreadyAdopted { .. }));
        assert_eq!(ledger.free_drives().len(), 1);
    }

    #[test]
    fn test_adopt_unknown_key() {
        let ledger = ledger();
        let result = ledger.adopt(&key("sdz"), |_| Ok(()));
        assert_matches!(result, Err(Error::DriveNotFound { .. }));
        assert_eq!(ledger.stats().claimed, 0);
    }

    #[test]
    fn test_failed_persist_records_nothing() {
        let ledger = ledger();
        let result = ledger.adopt(&key("sdb"), |_| Err(Error::Internal("disk full".into())));
        assert_matches!(result, Err(Error::Internal(_)));
        assert!(!ledger.is_claimed(&key("sdb")));
        assert!(ledger.free_drives().is_empty());

        // A later attempt still succeeds
        assert!(ledger.adopt(&key("sdb"), |_| Ok(())).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let ledger = ledger();
        let a = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();
        let b = ledger.adopt(&key("sdc"), |_| Ok(())).unwrap();

        assert_eq!(ledger.release(&[a.uuid, Uuid::new_v4()]), 1);
        assert_eq!(ledger.release(&[a.uuid]), 0);
        assert!(ledger.lookup_by_uuid(a.uuid).is_none());
        assert!(ledger.lookup_by_uuid(b.uuid).is_some());
        // Released drives stay claimed
        assert!(ledger.is_claimed(&key("sdb")));
    }

    #[test]
    fn test_take_free_is_all_or_nothing() {
        let ledger = ledger();
        let a = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();
        let b = ledger.adopt(&key("sdc"), |_| Ok(())).unwrap();

        let missing = Uuid::new_v4();
        assert_matches!(
            ledger.take_free(&[a.uuid, missing]),
            Err(Error::DriveNotFoundOrInUse { uuid }) if uuid == missing
        );
        assert_matches!(
            ledger.take_free(&[a.uuid, b.uuid, a.uuid]),
            Err(Error::DuplicateDriveKey { .. })
        );
        assert_eq!(ledger.free_drives().len(), 2);

        let taken = ledger.take_free(&[b.uuid, a.uuid]).unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].uuid, b.uuid);
        assert!(ledger.free_drives().is_empty());

        assert_matches!(
            ledger.take_free(&[a.uuid]),
            Err(Error::DriveNotFoundOrInUse { .. })
        );
    }

    #[test]
    fn test_restore_clears_pool_binding() {
        let ledger = ledger();
        let a = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();
        let mut taken = ledger.take_free(&[a.uuid]).unwrap();
        taken[0].pool_id = Some(Uuid::new_v4());

        ledger.restore(taken);
        let restored = ledger.lookup_by_key(&key("sdb")).unwrap();
        assert_eq!(restored.uuid, a.uuid);
        assert_eq!(restored.pool_id, None);
    }

    #[test]
    fn test_unadopt_only_free_drives() {
        let ledger = ledger();
        let a = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();
        let b = ledger.adopt(&key("sdc"), |_| Ok(())).unwrap();
        ledger.take_free(&[b.uuid]).unwrap();

        assert_matches!(
            ledger.unadopt(b.uuid, |_| Ok(())),
            Err(Error::DriveNotFoundOrInUse { .. })
        );

        ledger.unadopt(a.uuid, |_| Ok(())).unwrap();
        assert!(!ledger.is_claimed(&key("sdb")));
        assert_eq!(ledger.scanned(&key("sdb")).unwrap().uuid, None);
        // The key can be adopted again
        assert!(ledger.adopt(&key("sdb"), |_| Ok(())).is_ok());
    }

    #[test]
    fn test_refresh_rebinds_free_adoptions() {
        let ledger = ledger();
        let a = ledger.adopt(&key("sdb"), |_| Ok(())).unwrap();

        // Same disk renumbered after a reboot
        let mut renamed = drive("sdb", 500 << 30, 0);
        renamed.name = "sdf".into();
        renamed.path = "/dev/sdf".into();
        ledger.refresh(vec![renamed]);

        let rebound = ledger.lookup_by_uuid(a.uuid).unwrap();
        assert_eq!(rebound.drive.path, "/dev/sdf");
        assert_eq!(rebound.drive.uuid, Some(a.uuid));
        assert_eq!(ledger.snapshot()[0].uuid, Some(a.uuid));
    }

    #[test]
    fn test_concurrent_adopt_same_key() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.adopt(&key("sdd"), |_| Ok(())).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(ledger.free_drives().len(), 1);
        assert_eq!(ledger.stats().adoptions, 1);
    }
}
