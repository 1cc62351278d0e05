//! Hard removal of long soft-deleted zones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ZonePurgeConfig;
use crate::context::RequestContext;
use crate::coordination::Partition;
use crate::error::Result;
use crate::metrics;
use crate::scheduler::{PeriodicTask, TaskDescriptor, TaskReport};
use crate::transaction::TransactionRunner;

/// Purges zones whose `deleted_at` is older than the retention threshold.
///
/// Only the oldest `batch_size` eligible zones go per tick; the rest wait
/// for later ticks. Listing and purging share one transaction.
pub struct DeletedZonePurgeTask {
    descriptor: TaskDescriptor,
    time_threshold: Duration,
    runner: TransactionRunner,
}

impl DeletedZonePurgeTask {
    /// Registry name.
    pub const NAME: &'static str = "zone_purge";

    /// Task over the runner's storage.
    pub fn new(config: &ZonePurgeConfig, runner: TransactionRunner) -> Self {
        Self {
            descriptor: TaskDescriptor {
                name: Self::NAME.to_string(),
                interval: Duration::from_secs(config.interval),
                batch_size: config.batch_size,
            },
            time_threshold: Duration::from_secs(config.time_threshold),
            runner,
        }
    }

    /// Zones deleted before this instant are eligible.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let threshold = chrono::Duration::from_std(self.time_threshold)
            .unwrap_or_else(|_| chrono::Duration::zero());
        now - threshold
    }
}

#[async_trait]
impl PeriodicTask for DeletedZonePurgeTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &RequestContext, partition: Partition) -> Result<TaskReport> {
        let older_than = self.cutoff(Utc::now());
        let limit = self.descriptor.batch_size;
        let storage = Arc::clone(self.runner.storage());

        debug!(
            %older_than,
            limit,
            shards = partition.len(),
            "looking for zones to purge"
        );

        let purged = self
            .runner
            .run(ctx, (partition, older_than, limit), |_, (partition, older_than, limit)| {
                let storage = Arc::clone(&storage);
                async move {
                    let zones = storage
                        .list_deleted_zones(partition, older_than, limit)
                        .await?;
                    for zone in &zones {
                        storage.purge_zone(zone.id).await?;
                        debug!(zone_id = %zone.id, zone = %zone.name, "zone purged");
                    }
                    Ok(zones.len())
                }
            })
            .await?;

        if purged > 0 {
            info!(purged, "purged deleted zones");
        }
        metrics::record_zones_purged(purged);
        Ok(TaskReport::new(Self::NAME, purged))
    }
}
