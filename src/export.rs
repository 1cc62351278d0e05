//! Zone export.
//!
//! The API layer creates a pending [`ZoneExport`] and casts it here. The
//! exporter sizes the zone and picks how to produce it. Only synchronous
//! export exists: a zone within the size limit is marked complete with a
//! location the API layer renders on demand, anything else is marked failed.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::central::CentralApi;
use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::metrics;
use crate::model::{RecordSetCriterion, ZoneExport};

/// Prefix of the location handed back for a synchronous export.
pub const EXPORT_LOCATION_PREFIX: &str = "zone-manager://v2/zones/tasks/exports";

/// Decides how zone exports are produced and records the outcome.
#[derive(Clone)]
pub struct ZoneExporter {
    central: Arc<dyn CentralApi>,
    synchronous: bool,
    size_limit: usize,
}

impl ZoneExporter {
    /// Exporter writing outcomes through `central`.
    pub fn new(central: Arc<dyn CentralApi>, config: &ServiceConfig) -> Self {
        Self {
            central,
            synchronous: config.export_synchronous,
            size_limit: config.export_size_limit,
        }
    }

    /// Size `zone_id`, settle `export` and store the result.
    pub async fn start(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        mut export: ZoneExport,
    ) -> Result<ZoneExport> {
        export.zone_id = zone_id;
        let size = self
            .central
            .count_recordsets(ctx, &RecordSetCriterion::for_zone(zone_id))
            .await?;

        let export = self.determine_method(export, size);
        info!(
            request_id = %ctx.request_id(),
            export_id = %export.id,
            zone_id = %zone_id,
            size,
            status = ?export.status,
            "zone export settled"
        );
        metrics::record_export(export.status);
        self.central.update_zone_export(ctx, export).await
    }

    /// Settle `export` for a zone of `size` recordsets.
    pub fn determine_method(&self, export: ZoneExport, size: usize) -> ZoneExport {
        if !self.synchronous {
            debug!(export_id = %export.id, "no export method configured");
            return export.fail("No suitable method for export");
        }
        if size > self.size_limit {
            debug!(export_id = %export.id, size, limit = self.size_limit, "zone too large");
            return export.fail("Zone is too large to export");
        }

        let location = format!("{}/{}/export", EXPORT_LOCATION_PREFIX, export.id);
        export.complete(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::StorageCentral;
    use crate::model::{ExportStatus, RecordSet, RecordType, Zone};
    use crate::storage::MemoryStorage;
    use crate::transaction::{TransactionConfig, TransactionRunner};

    fn exporter(central: Arc<StorageCentral>, synchronous: bool, size_limit: usize) -> ZoneExporter {
        let config = ServiceConfig {
            export_synchronous: synchronous,
            export_size_limit: size_limit,
            ..Default::default()
        };
        ZoneExporter::new(central, &config)
    }

    async fn setup() -> (Arc<StorageCentral>, Zone) {
        let central = Arc::new(StorageCentral::new(TransactionRunner::new(
            Arc::new(MemoryStorage::new()),
            TransactionConfig::default(),
        )));
        let ctx = RequestContext::new();
        let zone = central.create_zone(&ctx, Zone::new("example.org.")).await.unwrap();
        central
            .create_recordset(&ctx, zone.id, RecordSet::new(zone.id, "www.example.org.", RecordType::A))
            .await
            .unwrap();
        (central, zone)
    }

    #[tokio::test]
    async fn test_determine_method_synchronous() {
        let (central, zone) = setup().await;
        let export = ZoneExport::new(zone.id);
        let id = export.id;

        let settled = exporter(central, true, 1000).determine_method(export, 1);

        assert_eq!(settled.status, ExportStatus::Complete);
        assert_eq!(
            settled.location,
            Some(format!("zone-manager://v2/zones/tasks/exports/{id}/export"))
        );
        assert_eq!(settled.message, None);
    }

    #[tokio::test]
    async fn test_determine_method_rejects_oversized_zone() {
        let (central, zone) = setup().await;

        let settled = exporter(central, true, 5).determine_method(ZoneExport::new(zone.id), 6);

        assert_eq!(settled.status, ExportStatus::Error);
        assert_eq!(settled.message.as_deref(), Some("Zone is too large to export"));
        assert_eq!(settled.location, None);
    }

    #[tokio::test]
    async fn test_determine_method_without_synchronous_export() {
        let (central, zone) = setup().await;

        let settled = exporter(central, false, 1000).determine_method(ZoneExport::new(zone.id), 0);

        assert_eq!(settled.status, ExportStatus::Error);
        assert_eq!(settled.message.as_deref(), Some("No suitable method for export"));
    }

    #[tokio::test]
    async fn test_start_sizes_the_zone_and_stores_the_outcome() {
        let (central, zone) = setup().await;
        let ctx = RequestContext::new();
        let pending = central.create_zone_export(&ctx, zone.id).await.unwrap();
        assert_eq!(pending.status, ExportStatus::Pending);

        // The zone holds one recordset: exactly at the limit still exports.
        let settled = exporter(central.clone(), true, 1)
            .start(&ctx, zone.id, pending.clone())
            .await
            .unwrap();
        assert_eq!(settled.status, ExportStatus::Complete);
        assert_eq!(central.get_zone_export(&ctx, pending.id).await.unwrap(), settled);

        let settled = exporter(central.clone(), true, 0)
            .start(&ctx, zone.id, pending.clone())
            .await
            .unwrap();
        assert_eq!(settled.status, ExportStatus::Error);
        assert_eq!(
            central.get_zone_export(&ctx, pending.id).await.unwrap().status,
            ExportStatus::Error
        );
    }
}
