//! The zone manager worker.
//!
//! Wires storage, the authoritative central layer, the partition assigner,
//! the scheduler and the cast consumer together, and runs them until the
//! cancellation token fires.
//!
//! ```text
//!   API layer ──cast──▶ ChannelTransport ──▶ cast consumer ──spawn──▶ AliasFlattener
//!                                                          └──spawn──▶ ZoneExporter
//!                                                                        │
//!   membership ──watch──▶ PartitionAssigner ──current()──▶ Scheduler     │
//!                                                            │ ticks     ▼
//!                                              zone_purge, delayed_notify, flatten_alias
//!                                                            │
//!                                   TransactionRunner / CentralApi / NotifyApi
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alias::AliasFlattener;
use crate::central::{CentralApi, LoggingNotifier, NotifyApi, StorageCentral};
use crate::config::Config;
use crate::context::RequestContext;
use crate::coordination::{MembershipSource, PartitionAssigner, StaticMembership};
use crate::error::{Error, Result};
use crate::export::ZoneExporter;
use crate::model::{RecordSet, ZoneExport};
use crate::resolver::NameResolver;
use crate::rpc::{CastEnvelope, ChannelTransport, ZoneManagerApi, ZoneManagerCast};
use crate::scheduler::{Scheduler, TaskRegistry, TaskReport, TaskState};
use crate::storage::{MemoryStorage, Storage};
use crate::tasks::{DeletedZonePurgeTask, DelayedNotifyTask, FlattenAliasTask};
use crate::transaction::TransactionRunner;

/// Assembles a [`ZoneManagerService`].
pub struct ServiceBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    resolver: Option<Arc<dyn NameResolver>>,
    notify: Option<Arc<dyn NotifyApi>>,
    membership: Option<Arc<dyn MembershipSource>>,
    central: Option<Arc<dyn CentralApi>>,
}

impl ServiceBuilder {
    /// Storage backend. Defaults to an empty [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// ALIAS target resolver. Required.
    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Propagation sink. Defaults to [`LoggingNotifier`].
    pub fn notify(mut self, notify: Arc<dyn NotifyApi>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Membership view. Defaults to the configured static member list.
    pub fn membership(mut self, membership: Arc<dyn MembershipSource>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Central API used by the reconciler and the flatten sweep instead of
    /// the built-in storage-backed one.
    pub fn central(mut self, central: Arc<dyn CentralApi>) -> Self {
        self.central = Some(central);
        self
    }

    /// Validate the configuration and wire everything up.
    pub fn build(self) -> Result<ZoneManagerService> {
        self.config.validate()?;
        let resolver = self
            .resolver
            .ok_or_else(|| Error::Config("a name resolver is required".into()))?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let notify = self.notify.unwrap_or_else(|| Arc::new(LoggingNotifier));
        let membership = self.membership.unwrap_or_else(|| {
            Arc::new(StaticMembership::new(self.config.service.initial_members()))
        });

        let runner = TransactionRunner::new(storage, self.config.storage.clone());
        let (transport, casts) = ChannelTransport::channel();
        let api = ZoneManagerApi::new(Arc::new(transport));
        let authority =
            Arc::new(StorageCentral::new(runner.clone()).with_zone_manager(api.clone()));
        let central: Arc<dyn CentralApi> = match self.central {
            Some(central) => central,
            None => authority.clone(),
        };

        let flattener = AliasFlattener::new(Arc::clone(&central), resolver);
        let exporter = ZoneExporter::new(Arc::clone(&central), &self.config.service);
        let tasks = &self.config.tasks;
        let registry = TaskRegistry::new()
            .with(Arc::new(DeletedZonePurgeTask::new(
                &tasks.zone_purge,
                runner.clone(),
            )))
            .with(Arc::new(DelayedNotifyTask::new(
                &tasks.delayed_notify,
                runner.clone(),
                notify,
            )))
            .with(Arc::new(FlattenAliasTask::new(
                &tasks.flatten_alias,
                central,
                flattener.clone(),
            )));

        let assigner = PartitionAssigner::new(self.config.service.worker_id.clone(), membership);
        let scheduler = Scheduler::new(
            registry,
            self.config.service.enabled_tasks.as_deref(),
            assigner.clone(),
        );

        Ok(ZoneManagerService {
            authority,
            flattener,
            exporter,
            scheduler,
            assigner,
            api,
            casts: parking_lot::Mutex::new(Some(casts)),
            tracker: TaskTracker::new(),
        })
    }
}

/// A running zone manager worker.
pub struct ZoneManagerService {
    authority: Arc<StorageCentral>,
    flattener: AliasFlattener,
    exporter: ZoneExporter,
    scheduler: Scheduler,
    assigner: PartitionAssigner,
    api: ZoneManagerApi,
    casts: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<CastEnvelope>>>,
    tracker: TaskTracker,
}

impl ZoneManagerService {
    /// Start assembling a worker from `config`.
    pub fn builder(config: Config) -> ServiceBuilder {
        ServiceBuilder {
            config,
            storage: None,
            resolver: None,
            notify: None,
            membership: None,
            central: None,
        }
    }

    /// Authoritative layer over this worker's storage. Its ALIAS mutations
    /// are cast back to this worker.
    pub fn central(&self) -> &Arc<StorageCentral> {
        &self.authority
    }

    /// Client for casting to this worker.
    pub fn api(&self) -> ZoneManagerApi {
        self.api.clone()
    }

    /// Partition assigner.
    pub fn assigner(&self) -> &PartitionAssigner {
        &self.assigner
    }

    /// State of a scheduled task.
    pub fn task_state(&self, name: &str) -> Option<TaskState> {
        self.scheduler.state(name)
    }

    /// Run a task once, out of band.
    pub async fn trigger(&self, name: &str) -> Result<TaskReport> {
        self.scheduler.trigger(name).await
    }

    /// Flatten an ALIAS recordset in the background.
    ///
    /// The work runs in its own transaction, never the caller's.
    pub fn flatten_alias_record(&self, ctx: RequestContext, zone_id: Uuid, recordset: RecordSet) {
        let flattener = self.flattener.clone();
        let ctx = ctx.detached();
        self.tracker.spawn(async move {
            if let Err(e) = flattener.flatten(&ctx, zone_id, &recordset).await {
                error!(
                    request_id = %ctx.request_id(),
                    recordset_id = %recordset.id,
                    error = %e,
                    "ALIAS flatten failed"
                );
            }
        });
    }

    /// Remove the mirror of a deleted ALIAS recordset in the background.
    pub fn delete_alias_record(&self, ctx: RequestContext, zone_id: Uuid, recordset: RecordSet) {
        let flattener = self.flattener.clone();
        let ctx = ctx.detached();
        self.tracker.spawn(async move {
            if let Err(e) = flattener.delete(&ctx, zone_id, &recordset).await {
                error!(
                    request_id = %ctx.request_id(),
                    recordset_id = %recordset.id,
                    error = %e,
                    "ALIAS delete failed"
                );
            }
        });
    }

    /// Settle a pending zone export in the background.
    pub fn start_zone_export(&self, ctx: RequestContext, zone_id: Uuid, export: ZoneExport) {
        let exporter = self.exporter.clone();
        let ctx = ctx.detached();
        self.tracker.spawn(async move {
            if let Err(e) = exporter.start(&ctx, zone_id, export).await {
                error!(
                    request_id = %ctx.request_id(),
                    zone_id = %zone_id,
                    error = %e,
                    "zone export failed"
                );
            }
        });
    }

    /// Dispatch a delivered cast without waiting for its outcome.
    pub fn handle_cast(&self, envelope: CastEnvelope) {
        debug!(
            request_id = %envelope.ctx.request_id(),
            method = envelope.message.method(),
            "received cast"
        );
        match envelope.message {
            ZoneManagerCast::FlattenAliasRecord { zone_id, recordset } => {
                self.flatten_alias_record(envelope.ctx, zone_id, recordset)
            }
            ZoneManagerCast::DeleteAliasRecord { zone_id, recordset } => {
                self.delete_alias_record(envelope.ctx, zone_id, recordset)
            }
            ZoneManagerCast::StartZoneExport { zone_id, export } => {
                self.start_zone_export(envelope.ctx, zone_id, export)
            }
        }
    }

    /// Wait for every background cast spawned so far.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Run until `token` is cancelled, then drain.
    ///
    /// In-flight task runs and background casts finish before this returns.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let Some(mut casts) = self.casts.lock().take() else {
            return Err(Error::Config("service is already running".into()));
        };

        info!(
            worker_id = %self.assigner.member_id(),
            tasks = ?self.scheduler.enabled_tasks(),
            "starting zone manager"
        );

        let assigner = tokio::spawn(self.assigner.clone().run(token.child_token()));
        self.scheduler.start();

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("zone manager received shutdown signal");
                    break;
                }

                envelope = casts.recv() => match envelope {
                    Some(envelope) => self.handle_cast(envelope),
                    None => {
                        warn!("cast channel closed, waiting for shutdown");
                        token.cancelled().await;
                        break;
                    }
                },
            }
        }

        self.scheduler.stop().await;
        self.tracker.close();
        self.tracker.wait().await;
        if let Err(e) = assigner.await {
            error!("partition assigner panicked: {}", e);
        }

        *self.casts.lock() = Some(casts);
        info!("zone manager stopped");
        Ok(())
    }
}
