//! In-memory storage backend.
//!
//! Used by the standalone worker and by tests. Transactions are serialized
//! through a session lock (one open transaction at a time, like a single
//! database connection), `begin` snapshots the tables and `rollback`
//! restores the snapshot. Writes made outside a transaction are applied
//! directly and are not isolated from a concurrent rollback.
//!
//! Reads never take the session lock. A read issued while another caller's
//! transaction is open sees that transaction's uncommitted writes, and may
//! see them vanish if it rolls back (read-uncommitted).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Storage, StorageResult};
use crate::coordination::Partition;
use crate::error::StorageError;
use crate::model::{RecordSet, RecordSetCriterion, Zone, ZoneExport};

#[derive(Debug, Clone, Default)]
struct Tables {
    zones: HashMap<Uuid, Zone>,
    recordsets: HashMap<Uuid, RecordSet>,
    exports: HashMap<Uuid, ZoneExport>,
}

struct OpenTransaction {
    _session: OwnedMutexGuard<()>,
    snapshot: Tables,
}

/// Counters of transaction boundary calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// `begin` calls.
    pub begins: usize,
    /// `commit` calls.
    pub commits: usize,
    /// `rollback` calls.
    pub rollbacks: usize,
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

struct InjectedFailure {
    error: StorageError,
    remaining: usize,
}

/// Thread-safe in-memory storage.
#[derive(Clone)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    session: Arc<tokio::sync::Mutex<()>>,
    open: Arc<Mutex<Option<OpenTransaction>>>,
    counters: Arc<Counters>,
    failures: Arc<Mutex<Option<InjectedFailure>>>,
    commit_failures: Arc<AtomicUsize>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            session: Arc::new(tokio::sync::Mutex::new(())),
            open: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
            failures: Arc::new(Mutex::new(None)),
            commit_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` data operations fail with `error`.
    ///
    /// Transaction boundary calls are never affected.
    pub fn inject_failures(&self, error: StorageError, count: usize) {
        *self.failures.lock() = Some(InjectedFailure {
            error,
            remaining: count,
        });
    }

    /// Make the next `count` data operations fail with a deadlock.
    pub fn inject_deadlocks(&self, count: usize) {
        self.inject_failures(StorageError::Deadlock("injected".to_string()), count);
    }

    /// Make the next `count` commits fail with a deadlock.
    ///
    /// A failed commit leaves the transaction open, holding the session
    /// until it is rolled back.
    pub fn inject_commit_failures(&self, count: usize) {
        self.commit_failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of transaction boundary counters.
    pub fn transaction_stats(&self) -> TransactionStats {
        TransactionStats {
            begins: self.counters.begins.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// True while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.open.lock().is_some()
    }

    /// Every zone row, including soft-deleted ones.
    pub fn all_zones(&self) -> Vec<Zone> {
        let mut zones: Vec<Zone> = self.tables.read().zones.values().cloned().collect();
        zones.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        zones
    }

    /// Count of zone rows.
    pub fn zone_count(&self) -> usize {
        self.tables.read().zones.len()
    }

    /// Count of recordset rows.
    pub fn recordset_count(&self) -> usize {
        self.tables.read().recordsets.len()
    }

    fn check_failure(&self, op: &str) -> StorageResult<()> {
        let mut failures = self.failures.lock();
        if let Some(failure) = failures.as_mut() {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                let error = failure.error.clone();
                if failure.remaining == 0 {
                    *failures = None;
                }
                debug!(op, %error, "injected storage failure");
                return Err(error);
            }
        }
        Ok(())
    }

    fn check_unique(tables: &Tables, recordset: &RecordSet) -> StorageResult<()> {
        let clash = tables.recordsets.values().any(|existing| {
            existing.id != recordset.id
                && existing.zone_id == recordset.zone_id
                && existing.name == recordset.name
                && existing.record_type == recordset.record_type
        });
        if clash {
            return Err(StorageError::Duplicate {
                kind: "recordset",
                detail: format!("{} {}", recordset.name, recordset.record_type),
            });
        }
        Ok(())
    }

    fn sorted_recordsets(tables: &Tables, criterion: &RecordSetCriterion) -> Vec<RecordSet> {
        let mut found: Vec<RecordSet> = tables
            .recordsets
            .values()
            .filter(|rs| criterion.matches(rs))
            .cloned()
            .collect();
        found.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
        found
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> StorageResult<()> {
        let session = Arc::clone(&self.session).lock_owned().await;
        let snapshot = self.tables.read().clone();
        *self.open.lock() = Some(OpenTransaction {
            _session: session,
            snapshot,
        });
        self.counters.begins.fetch_add(1, Ordering::Relaxed);
        trace!("transaction started");
        Ok(())
    }

    async fn commit(&self) -> StorageResult<()> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        let injected = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!("injected commit failure");
            return Err(StorageError::Deadlock("injected commit".to_string()));
        }
        match self.open.lock().take() {
            Some(_) => {
                trace!("transaction committed");
                Ok(())
            }
            None => Err(StorageError::NoTransaction),
        }
    }

    async fn rollback(&self) -> StorageResult<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        let open = self.open.lock().take();
        match open {
            Some(tx) => {
                *self.tables.write() = tx.snapshot;
                debug!("transaction rolled back");
                Ok(())
            }
            None => Err(StorageError::NoTransaction),
        }
    }

    async fn create_zone(&self, zone: Zone) -> StorageResult<Zone> {
        self.check_failure("create_zone")?;
        let mut tables = self.tables.write();
        if tables.zones.values().any(|z| z.name == zone.name && !z.is_deleted()) {
            return Err(StorageError::Duplicate {
                kind: "zone",
                detail: zone.name,
            });
        }
        debug!(zone_id = %zone.id, name = %zone.name, "creating zone");
        tables.zones.insert(zone.id, zone.clone());
        Ok(zone)
    }

    async fn get_zone(&self, zone_id: Uuid) -> StorageResult<Zone> {
        self.check_failure("get_zone")?;
        self.tables
            .read()
            .zones
            .get(&zone_id)
            .cloned()
            .ok_or_else(|| StorageError::zone_not_found(zone_id))
    }

    async fn update_zone(&self, zone: Zone) -> StorageResult<Zone> {
        self.check_failure("update_zone")?;
        let mut tables = self.tables.write();
        let slot = tables
            .zones
            .get_mut(&zone.id)
            .ok_or_else(|| StorageError::zone_not_found(zone.id))?;
        *slot = zone.clone();
        Ok(zone)
    }

    async fn list_deleted_zones(
        &self,
        partition: Partition,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<Zone>> {
        self.check_failure("list_deleted_zones")?;
        let tables = self.tables.read();
        let mut zones: Vec<Zone> = tables
            .zones
            .values()
            .filter(|z| z.is_deleted() && partition.contains(z.shard()))
            .filter(|z| z.deleted_at.is_some_and(|at| at < older_than))
            .cloned()
            .collect();
        zones.sort_by(|a, b| (a.deleted_at, a.id).cmp(&(b.deleted_at, b.id)));
        zones.truncate(limit);
        Ok(zones)
    }

    async fn purge_zone(&self, zone_id: Uuid) -> StorageResult<Zone> {
        self.check_failure("purge_zone")?;
        let mut tables = self.tables.write();
        let zone = tables
            .zones
            .remove(&zone_id)
            .ok_or_else(|| StorageError::zone_not_found(zone_id))?;
        tables.recordsets.retain(|_, rs| rs.zone_id != zone_id);
        tables.exports.retain(|_, export| export.zone_id != zone_id);
        debug!(zone_id = %zone_id, name = %zone.name, "purged zone");
        Ok(zone)
    }

    async fn list_delayed_notify_zones(
        &self,
        partition: Partition,
        limit: usize,
    ) -> StorageResult<Vec<Zone>> {
        self.check_failure("list_delayed_notify_zones")?;
        let tables = self.tables.read();
        let mut zones: Vec<Zone> = tables
            .zones
            .values()
            .filter(|z| z.delayed_notify && !z.is_deleted() && partition.contains(z.shard()))
            .cloned()
            .collect();
        zones.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        zones.truncate(limit);
        Ok(zones)
    }

    async fn get_recordset(&self, criterion: &RecordSetCriterion) -> StorageResult<RecordSet> {
        self.check_failure("get_recordset")?;
        let tables = self.tables.read();
        Self::sorted_recordsets(&tables, criterion)
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::recordset_not_found(format!("{criterion:?}")))
    }

    async fn find_recordsets(
        &self,
        criterion: &RecordSetCriterion,
    ) -> StorageResult<Vec<RecordSet>> {
        self.check_failure("find_recordsets")?;
        let tables = self.tables.read();
        let mut found = Self::sorted_recordsets(&tables, criterion);
        if let Some(limit) = criterion.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn create_recordset(
        &self,
        zone_id: Uuid,
        mut recordset: RecordSet,
    ) -> StorageResult<RecordSet> {
        self.check_failure("create_recordset")?;
        let mut tables = self.tables.write();
        if !tables.zones.contains_key(&zone_id) {
            return Err(StorageError::zone_not_found(zone_id));
        }
        recordset.zone_id = zone_id;
        Self::check_unique(&tables, &recordset)?;
        debug!(
            zone_id = %zone_id,
            recordset_id = %recordset.id,
            name = %recordset.name,
            record_type = %recordset.record_type,
            records = recordset.records.len(),
            "creating recordset"
        );
        tables.recordsets.insert(recordset.id, recordset.clone());
        Ok(recordset)
    }

    async fn update_recordset(&self, recordset: RecordSet) -> StorageResult<RecordSet> {
        self.check_failure("update_recordset")?;
        let mut tables = self.tables.write();
        if !tables.recordsets.contains_key(&recordset.id) {
            return Err(StorageError::recordset_not_found(recordset.id));
        }
        Self::check_unique(&tables, &recordset)?;
        debug!(
            recordset_id = %recordset.id,
            records = recordset.records.len(),
            "updating recordset"
        );
        tables.recordsets.insert(recordset.id, recordset.clone());
        Ok(recordset)
    }

    async fn delete_recordset(
        &self,
        zone_id: Uuid,
        recordset_id: Uuid,
    ) -> StorageResult<RecordSet> {
        self.check_failure("delete_recordset")?;
        let mut tables = self.tables.write();
        match tables.recordsets.get(&recordset_id) {
            Some(rs) if rs.zone_id == zone_id => {}
            _ => return Err(StorageError::recordset_not_found(recordset_id)),
        }
        let removed = tables
            .recordsets
            .remove(&recordset_id)
            .ok_or_else(|| StorageError::recordset_not_found(recordset_id))?;
        debug!(zone_id = %zone_id, recordset_id = %recordset_id, "deleted recordset");
        Ok(removed)
    }

    async fn count_recordsets(&self, criterion: &RecordSetCriterion) -> StorageResult<usize> {
        self.check_failure("count_recordsets")?;
        let tables = self.tables.read();
        Ok(tables
            .recordsets
            .values()
            .filter(|rs| criterion.matches(rs))
            .count())
    }

    async fn get_zone_export(&self, export_id: Uuid) -> StorageResult<ZoneExport> {
        self.check_failure("get_zone_export")?;
        self.tables
            .read()
            .exports
            .get(&export_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "zone_export",
                id: export_id.to_string(),
            })
    }

    async fn update_zone_export(&self, export: ZoneExport) -> StorageResult<ZoneExport> {
        self.check_failure("update_zone_export")?;
        let mut tables = self.tables.write();
        if !tables.zones.contains_key(&export.zone_id) {
            return Err(StorageError::zone_not_found(export.zone_id));
        }
        debug!(export_id = %export.id, status = ?export.status, "storing zone export");
        tables.exports.insert(export.id, export.clone());
        Ok(export)
    }
}
