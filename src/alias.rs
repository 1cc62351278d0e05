//! ALIAS flattening.
//!
//! DNS forbids a CNAME at the zone apex, so an ALIAS recordset is kept out of
//! publication and mirrored by an A recordset holding the resolved addresses
//! of its targets. The mirror is rebuilt wholesale on every run:
//!
//! ```text
//! ALIAS example.org. ──▶ [target-1, target-2]
//!                            │ resolve each, failures give no addresses
//!                            ▼
//!             managed A records (provenance = ALIAS record id)
//!                            │
//!             existing A recordset in zone? ── yes ──▶ replace records
//!                            └──────────────── no ───▶ create (ttl 3600, visible mdns)
//! ```

use hickory_proto::rr::Name;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::central::CentralApi;
use crate::context::RequestContext;
use crate::error::{ResolveFailure, Result};
use crate::metrics::{self, FlattenAction, ResolutionResult};
use crate::model::{Record, RecordSet, RecordSetCriterion, RecordType, Visibility};
use crate::resolver::NameResolver;

/// TTL of a newly created mirror recordset.
pub const FLATTENED_TTL: u32 = 3600;

/// Provenance type stamped on mirrored records.
pub const MANAGED_RESOURCE_TYPE: &str = "ALIAS";

/// Builds and maintains the A recordset mirroring an ALIAS recordset.
#[derive(Clone)]
pub struct AliasFlattener {
    central: Arc<dyn CentralApi>,
    resolver: Arc<dyn NameResolver>,
}

impl AliasFlattener {
    /// Flattener writing through `central` and resolving with `resolver`.
    pub fn new(central: Arc<dyn CentralApi>, resolver: Arc<dyn NameResolver>) -> Self {
        Self { central, resolver }
    }

    /// Resolve an ALIAS target to its IPv4 addresses.
    ///
    /// Never fails: a missing name, an unreachable resolver and a malformed
    /// target all yield an empty list.
    pub async fn find_target_addresses(&self, target: &str) -> Vec<Ipv4Addr> {
        if target.trim().is_empty() || Name::from_ascii(target).is_err() {
            warn!(target, "ALIAS target is not a valid DNS name");
            metrics::record_resolution(ResolutionResult::InvalidName);
            return Vec::new();
        }

        match self.resolver.lookup_ipv4(target).await {
            Ok(addresses) => {
                debug!(target, count = addresses.len(), "ALIAS target resolved");
                metrics::record_resolution(ResolutionResult::Success);
                addresses
            }
            Err(ResolveFailure::NotFound(_)) => {
                debug!(target, "ALIAS target does not exist");
                metrics::record_resolution(ResolutionResult::NotFound);
                Vec::new()
            }
            Err(ResolveFailure::Transport(reason)) => {
                warn!(target, %reason, "ALIAS target lookup failed");
                metrics::record_resolution(ResolutionResult::Transport);
                Vec::new()
            }
        }
    }

    /// Managed A records for one ALIAS record, one per resolved address.
    pub async fn create_records_for(&self, alias: &Record) -> Vec<Record> {
        self.find_target_addresses(&alias.data)
            .await
            .into_iter()
            .map(|ip| Record::managed_by(ip.to_string(), MANAGED_RESOURCE_TYPE, alias.id))
            .collect()
    }

    /// The zone's A recordset, if any.
    pub async fn existing_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
    ) -> Result<Option<RecordSet>> {
        let criterion = RecordSetCriterion::for_zone(zone_id).with_type(RecordType::A);
        match self.central.find_recordset(ctx, &criterion).await {
            Ok(recordset) => Ok(Some(recordset)),
            Err(e) if e.is_recordset_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current serial of the zone.
    pub async fn find_serial(&self, ctx: &RequestContext, zone_id: Uuid) -> Result<u32> {
        Ok(self.central.get_zone(ctx, zone_id).await?.serial)
    }

    /// Create or refresh the mirror of `alias`.
    ///
    /// All targets are resolved before a single create or update is issued.
    pub async fn flatten(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        alias: &RecordSet,
    ) -> Result<FlattenAction> {
        let ctx = ctx.clone().with_managed_records();

        let mut records = Vec::new();
        for record in &alias.records {
            info!(alias = %alias.name, target = %record.data, "flattening ALIAS record");
            records.extend(self.create_records_for(record).await);
        }
        let addresses = records.len();

        let action = match self.existing_recordset(&ctx, zone_id).await? {
            Some(mut existing) => {
                existing.records = records;
                info!(
                    recordset_id = %existing.id,
                    name = %existing.name,
                    addresses,
                    "updating flattened A recordset"
                );
                self.central.update_recordset(&ctx, existing).await?;
                FlattenAction::Updated
            }
            None => {
                let recordset = RecordSet::new(zone_id, alias.name.clone(), RecordType::A)
                    .with_ttl(FLATTENED_TTL)
                    .with_visibility(Visibility::Mdns)
                    .with_records(records);
                info!(name = %recordset.name, addresses, "creating flattened A recordset");
                self.central.create_recordset(&ctx, zone_id, recordset).await?;
                FlattenAction::Created
            }
        };

        metrics::record_flatten(action, addresses);

        // The write above is committed; a failed read only costs the log field.
        match self.find_serial(&ctx, zone_id).await {
            Ok(serial) => debug!(zone_id = %zone_id, serial, "ALIAS flattened"),
            Err(e) => debug!(zone_id = %zone_id, error = %e, "ALIAS flattened, serial unknown"),
        }
        Ok(action)
    }

    /// Remove the mirror of a deleted ALIAS recordset. No mirror is not an
    /// error.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        alias: &RecordSet,
    ) -> Result<FlattenAction> {
        let ctx = ctx.clone().with_managed_records();

        let action = match self.existing_recordset(&ctx, zone_id).await? {
            Some(existing) => {
                info!(
                    alias = %alias.name,
                    recordset_id = %existing.id,
                    "deleting flattened A recordset"
                );
                self.central
                    .delete_recordset(&ctx, zone_id, existing.id)
                    .await?;
                FlattenAction::Deleted
            }
            None => {
                debug!(alias = %alias.name, "no flattened A recordset to delete");
                FlattenAction::Noop
            }
        };

        metrics::record_flatten(action, 0);
        Ok(action)
    }
}
