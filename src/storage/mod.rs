//! Storage port consumed by the worker tier.
//!
//! The schema and query layer live elsewhere; this trait is the narrow
//! contract the tasks and the authoritative central implementation rely on.
//! Every call may block on I/O and may fail with
//! [`StorageError::Deadlock`](crate::error::StorageError::Deadlock) under
//! contention, which [`TransactionRunner`](crate::transaction::TransactionRunner)
//! retries.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::coordination::Partition;
use crate::error::StorageError;
use crate::model::{RecordSet, RecordSetCriterion, Zone, ZoneExport};

pub use memory::MemoryStorage;

/// Result type for storage calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Transactional access to zones and recordsets.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> StorageResult<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> StorageResult<()>;

    /// Discard the open transaction.
    async fn rollback(&self) -> StorageResult<()>;

    /// Insert a zone.
    async fn create_zone(&self, zone: Zone) -> StorageResult<Zone>;

    /// Fetch a zone by id.
    async fn get_zone(&self, zone_id: Uuid) -> StorageResult<Zone>;

    /// Overwrite a zone row.
    async fn update_zone(&self, zone: Zone) -> StorageResult<Zone>;

    /// Deleted zones in `partition` whose `deleted_at` is before
    /// `older_than`, oldest first, at most `limit`.
    async fn list_deleted_zones(
        &self,
        partition: Partition,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<Zone>>;

    /// Hard-delete a zone row and everything it owns.
    async fn purge_zone(&self, zone_id: Uuid) -> StorageResult<Zone>;

    /// Zones in `partition` flagged for delayed notify, at most `limit`.
    async fn list_delayed_notify_zones(
        &self,
        partition: Partition,
        limit: usize,
    ) -> StorageResult<Vec<Zone>>;

    /// The single recordset matching `criterion`.
    async fn get_recordset(&self, criterion: &RecordSetCriterion) -> StorageResult<RecordSet>;

    /// Every recordset matching `criterion`, up to its limit.
    async fn find_recordsets(
        &self,
        criterion: &RecordSetCriterion,
    ) -> StorageResult<Vec<RecordSet>>;

    /// Insert a recordset into `zone_id`.
    async fn create_recordset(
        &self,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> StorageResult<RecordSet>;

    /// Overwrite a recordset, records included.
    async fn update_recordset(&self, recordset: RecordSet) -> StorageResult<RecordSet>;

    /// Remove a recordset.
    async fn delete_recordset(&self, zone_id: Uuid, recordset_id: Uuid)
        -> StorageResult<RecordSet>;

    /// Number of recordsets matching `criterion`, ignoring its limit.
    async fn count_recordsets(&self, criterion: &RecordSetCriterion) -> StorageResult<usize>;

    /// Fetch a zone export by id.
    async fn get_zone_export(&self, export_id: Uuid) -> StorageResult<ZoneExport>;

    /// Insert or overwrite a zone export.
    async fn update_zone_export(&self, export: ZoneExport) -> StorageResult<ZoneExport>;
}
