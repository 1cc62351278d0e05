//! Coalesced zone propagation.
//!
//! Recordset mutations only flag their zone. This task turns any number of
//! flags raised within one interval into a single propagation per zone.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::central::NotifyApi;
use crate::config::DelayedNotifyConfig;
use crate::context::RequestContext;
use crate::coordination::Partition;
use crate::error::Result;
use crate::scheduler::{PeriodicTask, TaskDescriptor, TaskReport};
use crate::transaction::TransactionRunner;

/// Propagates zones flagged `delayed_notify`, then clears the flag.
pub struct DelayedNotifyTask {
    descriptor: TaskDescriptor,
    runner: TransactionRunner,
    notify: Arc<dyn NotifyApi>,
}

impl DelayedNotifyTask {
    /// Registry name.
    pub const NAME: &'static str = "delayed_notify";

    /// Task reading flags through `runner` and propagating through `notify`.
    pub fn new(
        config: &DelayedNotifyConfig,
        runner: TransactionRunner,
        notify: Arc<dyn NotifyApi>,
    ) -> Self {
        Self {
            descriptor: TaskDescriptor {
                name: Self::NAME.to_string(),
                interval: Duration::from_secs(config.interval),
                batch_size: config.batch_size,
            },
            runner,
            notify,
        }
    }
}

#[async_trait]
impl PeriodicTask for DelayedNotifyTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &RequestContext, partition: Partition) -> Result<TaskReport> {
        let storage = Arc::clone(self.runner.storage());
        let zones = storage
            .list_delayed_notify_zones(partition, self.descriptor.batch_size)
            .await?;

        debug!(count = zones.len(), "zones pending delayed notify");

        for zone in &zones {
            self.notify.update_zone(ctx, zone).await?;

            // Clear only what was propagated: a change committed since the
            // listing bumped the serial and keeps the flag for the next tick.
            let cleared = self
                .runner
                .run(ctx, (zone.id, zone.serial), |_, (zone_id, serial)| {
                    let storage = Arc::clone(&storage);
                    async move {
                        let mut current = storage.get_zone(zone_id).await?;
                        if current.serial != serial {
                            return Ok(false);
                        }
                        current.delayed_notify = false;
                        storage.update_zone(current).await?;
                        Ok(true)
                    }
                })
                .await?;
            if !cleared {
                debug!(
                    zone_id = %zone.id,
                    propagated_serial = zone.serial,
                    "zone changed during propagation, leaving it flagged"
                );
            }
        }

        if !zones.is_empty() {
            info!(count = zones.len(), "propagated delayed zones");
        }
        Ok(TaskReport::new(Self::NAME, zones.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Zone;
    use crate::storage::{MemoryStorage, Storage};
    use crate::transaction::TransactionConfig;
    use parking_lot::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl NotifyApi for RecordingNotifier {
        async fn update_zone(&self, _ctx: &RequestContext, zone: &Zone) -> Result<()> {
            self.calls.lock().push(zone.id);
            Ok(())
        }
    }

    fn task(
        storage: &MemoryStorage,
        batch_size: usize,
        notify: Arc<RecordingNotifier>,
    ) -> DelayedNotifyTask {
        DelayedNotifyTask::new(
            &DelayedNotifyConfig {
                interval: 1,
                batch_size,
            },
            TransactionRunner::new(Arc::new(storage.clone()), TransactionConfig::default()),
            notify,
        )
    }

    #[tokio::test]
    async fn test_coalesces_flagged_zones_over_ticks() {
        let storage = MemoryStorage::new();
        for i in 0..20 {
            let mut zone = Zone::new(format!("example{i}.org."));
            zone.delayed_notify = i % 2 == 0;
            storage.create_zone(zone).await.unwrap();
        }
        let notify = Arc::new(RecordingNotifier::default());
        let task = task(&storage, 5, notify.clone());
        let ctx = RequestContext::new();

        assert_eq!(task.run(&ctx, Partition::full()).await.unwrap().processed, 5);
        assert_eq!(task.run(&ctx, Partition::full()).await.unwrap().processed, 5);
        assert_eq!(task.run(&ctx, Partition::full()).await.unwrap().processed, 0);

        let calls = notify.calls.lock();
        assert_eq!(calls.len(), 10);
        let mut unique = calls.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);
        assert!(storage.all_zones().iter().all(|z| !z.delayed_notify));
    }

    #[tokio::test]
    async fn test_reflagged_zone_is_propagated_again() {
        let storage = MemoryStorage::new();
        let mut zone = Zone::new("example.org.");
        zone.delayed_notify = true;
        let zone = storage.create_zone(zone).await.unwrap();
        let notify = Arc::new(RecordingNotifier::default());
        let task = task(&storage, 100, notify.clone());
        let ctx = RequestContext::new();

        task.run(&ctx, Partition::full()).await.unwrap();
        let mut flagged = storage.get_zone(zone.id).await.unwrap();
        flagged.delayed_notify = true;
        storage.update_zone(flagged).await.unwrap();
        task.run(&ctx, Partition::full()).await.unwrap();

        assert_eq!(*notify.calls.lock(), vec![zone.id, zone.id]);
    }

    /// Notifier that lands a zone change while the propagation is in flight.
    struct ChangingNotifier {
        storage: MemoryStorage,
        serials: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl NotifyApi for ChangingNotifier {
        async fn update_zone(&self, _ctx: &RequestContext, zone: &Zone) -> Result<()> {
            let first = {
                let mut serials = self.serials.lock();
                serials.push(zone.serial);
                serials.len() == 1
            };
            if first {
                let mut changed = self.storage.get_zone(zone.id).await?;
                changed.bump_serial();
                changed.delayed_notify = true;
                self.storage.update_zone(changed).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_change_during_propagation_keeps_flag() {
        let storage = MemoryStorage::new();
        let mut zone = Zone::new("example.org.");
        zone.delayed_notify = true;
        let zone = storage.create_zone(zone).await.unwrap();
        let notify = Arc::new(ChangingNotifier {
            storage: storage.clone(),
            serials: Mutex::new(Vec::new()),
        });
        let task = DelayedNotifyTask::new(
            &DelayedNotifyConfig {
                interval: 1,
                batch_size: 100,
            },
            TransactionRunner::new(Arc::new(storage.clone()), TransactionConfig::default()),
            notify.clone(),
        );
        let ctx = RequestContext::new();

        task.run(&ctx, Partition::full()).await.unwrap();
        assert!(storage.get_zone(zone.id).await.unwrap().delayed_notify);

        task.run(&ctx, Partition::full()).await.unwrap();
        let stored = storage.get_zone(zone.id).await.unwrap();
        assert!(!stored.delayed_notify);
        assert_eq!(*notify.serials.lock(), vec![zone.serial, stored.serial]);
        assert!(stored.serial > zone.serial);
    }

    #[tokio::test]
    async fn test_deleted_zones_are_not_propagated() {
        let storage = MemoryStorage::new();
        let mut zone = Zone::new("gone.org.");
        zone.delayed_notify = true;
        zone.mark_deleted(chrono::Utc::now());
        storage.create_zone(zone).await.unwrap();
        let notify = Arc::new(RecordingNotifier::default());

        let report = task(&storage, 100, notify.clone())
            .run(&RequestContext::new(), Partition::full())
            .await
            .unwrap();

        assert_eq!(report.processed, 0);
        assert!(notify.calls.lock().is_empty());
    }
}
