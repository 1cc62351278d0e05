//! Authoritative API and zone propagation ports.
//!
//! Tasks never write zone data behind the authoritative layer's back: the
//! reconciler goes through [`CentralApi`] and propagation goes through
//! [`NotifyApi`]. [`StorageCentral`] is the in-process authoritative
//! implementation; every mutation it performs runs inside the
//! [`TransactionRunner`], so a caller composing several mutations under one
//! context gets a single transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{CentralError, Error, Result, StorageError};
use crate::metrics;
use crate::model::{RecordSet, RecordSetCriterion, RecordType, Visibility, Zone, ZoneExport};
use crate::rpc::ZoneManagerApi;
use crate::storage::Storage;
use crate::transaction::TransactionRunner;

/// Authoritative zone and recordset API.
#[async_trait]
pub trait CentralApi: Send + Sync {
    /// Fetch a zone.
    async fn get_zone(&self, ctx: &RequestContext, zone_id: Uuid) -> Result<Zone>;

    /// The single recordset matching `criterion`.
    ///
    /// Fails with [`CentralError::RecordSetNotFound`] when nothing matches.
    async fn find_recordset(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<RecordSet>;

    /// Every recordset matching `criterion`.
    async fn find_recordsets(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<Vec<RecordSet>>;

    /// Create a recordset in `zone_id`.
    async fn create_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> Result<RecordSet>;

    /// Replace a recordset, records included.
    async fn update_recordset(&self, ctx: &RequestContext, recordset: RecordSet)
        -> Result<RecordSet>;

    /// Delete a recordset.
    async fn delete_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset_id: Uuid,
    ) -> Result<RecordSet>;

    /// Number of recordsets matching `criterion`.
    async fn count_recordsets(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<usize>;

    /// Record the outcome of a zone export.
    async fn update_zone_export(&self, ctx: &RequestContext, export: ZoneExport)
        -> Result<ZoneExport>;
}

/// Zone propagation towards the DNS backends.
#[async_trait]
pub trait NotifyApi: Send + Sync {
    /// Push the current state of `zone` to the backends.
    async fn update_zone(&self, ctx: &RequestContext, zone: &Zone) -> Result<()>;
}

/// Propagation sink that only logs, for standalone mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotifyApi for LoggingNotifier {
    async fn update_zone(&self, ctx: &RequestContext, zone: &Zone) -> Result<()> {
        info!(
            request_id = %ctx.request_id(),
            zone_id = %zone.id,
            zone = %zone.name,
            serial = zone.serial,
            "propagating zone"
        );
        metrics::record_propagation();
        Ok(())
    }
}

/// Authoritative API over a [`Storage`].
///
/// Mutations run through the [`TransactionRunner`]. Reads go straight to
/// storage outside any transaction and get whatever isolation the backend
/// gives a bare read; over [`MemoryStorage`](crate::storage::MemoryStorage)
/// that is read-uncommitted.
#[derive(Clone)]
pub struct StorageCentral {
    runner: TransactionRunner,
    zone_manager: Option<ZoneManagerApi>,
}

impl StorageCentral {
    /// Central over the runner's storage.
    pub fn new(runner: TransactionRunner) -> Self {
        Self {
            runner,
            zone_manager: None,
        }
    }

    /// Cast ALIAS create/delete events to the zone manager.
    pub fn with_zone_manager(mut self, zone_manager: ZoneManagerApi) -> Self {
        self.zone_manager = Some(zone_manager);
        self
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(self.runner.storage())
    }

    /// Create a zone.
    pub async fn create_zone(&self, ctx: &RequestContext, zone: Zone) -> Result<Zone> {
        let storage = self.storage();
        self.runner
            .run(ctx, zone, |_, zone| {
                let storage = Arc::clone(&storage);
                async move { Ok(storage.create_zone(zone).await?) }
            })
            .await
    }

    /// Soft-delete a zone. Only purge removes the row afterwards.
    pub async fn delete_zone(&self, ctx: &RequestContext, zone_id: Uuid) -> Result<Zone> {
        let storage = self.storage();
        self.runner
            .run(ctx, zone_id, |_, zone_id| {
                let storage = Arc::clone(&storage);
                async move {
                    let mut zone = load_mutable_zone(storage.as_ref(), zone_id).await?;
                    zone.mark_deleted(Utc::now());
                    info!(zone_id = %zone.id, zone = %zone.name, "zone soft-deleted");
                    Ok(storage.update_zone(zone).await?)
                }
            })
            .await
    }

    /// Cast an ALIAS event once the change is committed.
    ///
    /// Called after the write's own `run` returned. If the caller still
    /// holds an outer transaction the cast is deferred to its commit and
    /// dropped if it rolls back.
    /// Accept a pending export of a live zone.
    pub async fn create_zone_export(&self, ctx: &RequestContext, zone_id: Uuid) -> Result<ZoneExport> {
        let storage = self.storage();
        self.runner
            .run(ctx, zone_id, |_, zone_id| {
                let storage = Arc::clone(&storage);
                async move {
                    load_mutable_zone(storage.as_ref(), zone_id).await?;
                    Ok(storage.update_zone_export(ZoneExport::new(zone_id)).await?)
                }
            })
            .await
    }

    /// Fetch a zone export.
    pub async fn get_zone_export(&self, _ctx: &RequestContext, export_id: Uuid) -> Result<ZoneExport> {
        Ok(self.storage().get_zone_export(export_id).await?)
    }

    async fn cast_alias_event(&self, ctx: &RequestContext, recordset: &RecordSet, deleted: bool) {
        let Some(zone_manager) = self.zone_manager.clone() else {
            return;
        };

        let cast = send_alias_event(zone_manager, ctx.detached(), recordset.clone(), deleted);
        if ctx.transaction_held() {
            debug!(recordset_id = %recordset.id, "ALIAS cast deferred to outer commit");
            ctx.defer(Box::pin(cast));
        } else {
            cast.await;
        }
    }
}

async fn send_alias_event(
    zone_manager: ZoneManagerApi,
    ctx: RequestContext,
    recordset: RecordSet,
    deleted: bool,
) {
    let result = if deleted {
        zone_manager
            .delete_alias_record(&ctx, recordset.zone_id, recordset.clone())
            .await
    } else {
        zone_manager
            .flatten_alias_record(&ctx, recordset.zone_id, recordset.clone())
            .await
    };

    if let Err(e) = result {
        warn!(
            recordset_id = %recordset.id,
            error = %e,
            "failed to cast ALIAS event to zone manager"
        );
    }
}

fn zone_error(zone_id: Uuid) -> impl Fn(StorageError) -> Error {
    move |e| match e {
        StorageError::NotFound { .. } => CentralError::ZoneNotFound(zone_id).into(),
        other => other.into(),
    }
}

fn recordset_error(e: StorageError) -> Error {
    match e {
        StorageError::NotFound { .. } => CentralError::RecordSetNotFound.into(),
        other => other.into(),
    }
}

async fn load_mutable_zone(storage: &dyn Storage, zone_id: Uuid) -> Result<Zone> {
    let zone = storage.get_zone(zone_id).await.map_err(zone_error(zone_id))?;
    if zone.is_deleted() {
        return Err(CentralError::ZoneDeleted(zone_id).into());
    }
    Ok(zone)
}

fn ensure_managed_allowed(ctx: &RequestContext, recordset: &RecordSet) -> Result<()> {
    if recordset.has_managed_records() && !ctx.edit_managed_records() {
        return Err(CentralError::ManagedRecord(recordset.id).into());
    }
    Ok(())
}

/// Bump the serial and flag the zone for coalesced propagation.
async fn touch_zone(storage: &dyn Storage, mut zone: Zone) -> Result<Zone> {
    zone.bump_serial();
    zone.delayed_notify = true;
    debug!(zone_id = %zone.id, serial = zone.serial, "zone changed");
    Ok(storage.update_zone(zone).await?)
}

#[async_trait]
impl CentralApi for StorageCentral {
    async fn get_zone(&self, _ctx: &RequestContext, zone_id: Uuid) -> Result<Zone> {
        self.storage()
            .get_zone(zone_id)
            .await
            .map_err(zone_error(zone_id))
    }

    async fn find_recordset(
        &self,
        _ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<RecordSet> {
        self.storage()
            .get_recordset(criterion)
            .await
            .map_err(recordset_error)
    }

    async fn find_recordsets(
        &self,
        _ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<Vec<RecordSet>> {
        Ok(self.storage().find_recordsets(criterion).await?)
    }

    async fn create_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> Result<RecordSet> {
        let storage = self.storage();
        let created = self
            .runner
            .run(ctx, recordset, |ctx, mut recordset| {
                let storage = Arc::clone(&storage);
                async move {
                    let zone = load_mutable_zone(storage.as_ref(), zone_id).await?;
                    ensure_managed_allowed(&ctx, &recordset)?;
                    if recordset.record_type == RecordType::ALIAS {
                        recordset.visible = Visibility::Api;
                    }
                    let created = storage.create_recordset(zone_id, recordset).await?;
                    touch_zone(storage.as_ref(), zone).await?;
                    Ok(created)
                }
            })
            .await?;

        if created.record_type == RecordType::ALIAS {
            self.cast_alias_event(ctx, &created, false).await;
        }
        Ok(created)
    }

    async fn update_recordset(
        &self,
        ctx: &RequestContext,
        recordset: RecordSet,
    ) -> Result<RecordSet> {
        let storage = self.storage();
        let updated = self
            .runner
            .run(ctx, recordset, |ctx, mut recordset| {
                let storage = Arc::clone(&storage);
                async move {
                    let existing = storage
                        .get_recordset(&RecordSetCriterion::by_id(recordset.id))
                        .await
                        .map_err(recordset_error)?;
                    let zone = load_mutable_zone(storage.as_ref(), existing.zone_id).await?;
                    ensure_managed_allowed(&ctx, &existing)?;
                    ensure_managed_allowed(&ctx, &recordset)?;

                    recordset.zone_id = existing.zone_id;
                    recordset.record_type = existing.record_type;
                    let updated = storage.update_recordset(recordset).await?;
                    touch_zone(storage.as_ref(), zone).await?;
                    Ok(updated)
                }
            })
            .await?;

        if updated.record_type == RecordType::ALIAS {
            self.cast_alias_event(ctx, &updated, false).await;
        }
        Ok(updated)
    }

    async fn delete_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset_id: Uuid,
    ) -> Result<RecordSet> {
        let storage = self.storage();
        let deleted = self
            .runner
            .run(ctx, recordset_id, |ctx, recordset_id| {
                let storage = Arc::clone(&storage);
                async move {
                    let criterion = RecordSetCriterion::by_id(recordset_id);
                    let existing = storage
                        .get_recordset(&criterion)
                        .await
                        .map_err(recordset_error)?;
                    if existing.zone_id != zone_id {
                        return Err(CentralError::RecordSetNotFound.into());
                    }
                    let zone = load_mutable_zone(storage.as_ref(), zone_id).await?;
                    ensure_managed_allowed(&ctx, &existing)?;

                    let deleted = storage
                        .delete_recordset(zone_id, recordset_id)
                        .await
                        .map_err(recordset_error)?;
                    touch_zone(storage.as_ref(), zone).await?;
                    Ok(deleted)
                }
            })
            .await?;

        if deleted.record_type == RecordType::ALIAS {
            self.cast_alias_event(ctx, &deleted, true).await;
        }
        Ok(deleted)
    }

    async fn count_recordsets(
        &self,
        _ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<usize> {
        Ok(self.storage().count_recordsets(criterion).await?)
    }

    async fn update_zone_export(
        &self,
        ctx: &RequestContext,
        export: ZoneExport,
    ) -> Result<ZoneExport> {
        let storage = self.storage();
        self.runner
            .run(ctx, export, |_, export| {
                let storage = Arc::clone(&storage);
                async move {
                    let zone_id = export.zone_id;
                    storage
                        .update_zone_export(export)
                        .await
                        .map_err(zone_error(zone_id))
                }
            })
            .await
    }
}
