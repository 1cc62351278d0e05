//! Periodic ALIAS flattening sweep.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::alias::AliasFlattener;
use crate::central::CentralApi;
use crate::config::FlattenAliasConfig;
use crate::context::RequestContext;
use crate::coordination::Partition;
use crate::error::Result;
use crate::model::{RecordSetCriterion, RecordType};
use crate::scheduler::{PeriodicTask, TaskDescriptor, TaskReport};

/// Re-flattens the ALIAS recordsets of the owned partition.
///
/// Catches target address changes that no API call announces. Every tick
/// walks the whole partition, `batch_size` recordsets per listing. A failure
/// abandons the rest of the tick; the next tick starts over.
pub struct FlattenAliasTask {
    descriptor: TaskDescriptor,
    central: Arc<dyn CentralApi>,
    flattener: AliasFlattener,
}

impl FlattenAliasTask {
    /// Registry name.
    pub const NAME: &'static str = "flatten_alias";

    /// Task listing through `central` and reconciling with `flattener`.
    pub fn new(
        config: &FlattenAliasConfig,
        central: Arc<dyn CentralApi>,
        flattener: AliasFlattener,
    ) -> Self {
        Self {
            descriptor: TaskDescriptor {
                name: Self::NAME.to_string(),
                interval: Duration::from_secs(config.interval),
                batch_size: config.batch_size,
            },
            central,
            flattener,
        }
    }
}

#[async_trait]
impl PeriodicTask for FlattenAliasTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &RequestContext, partition: Partition) -> Result<TaskReport> {
        let page_size = self.descriptor.batch_size;
        let mut criterion = RecordSetCriterion::of_type(RecordType::ALIAS)
            .within(partition)
            .limit(page_size);

        let mut flattened = 0;
        let mut pages = 0;
        loop {
            let page = self.central.find_recordsets(ctx, &criterion).await?;
            pages += 1;

            for recordset in &page {
                let zone = self.central.get_zone(ctx, recordset.zone_id).await?;
                if zone.is_deleted() {
                    debug!(zone_id = %zone.id, "skipping ALIAS in deleted zone");
                    continue;
                }
                self.flattener
                    .flatten(ctx, recordset.zone_id, recordset)
                    .await?;
                flattened += 1;
            }

            match page.last() {
                Some(last) if page.len() == page_size => criterion = criterion.after(last),
                _ => break,
            }
        }

        if flattened > 0 {
            info!(flattened, pages, "flattened ALIAS recordsets");
        }
        Ok(TaskReport::new(Self::NAME, flattened))
    }
}
