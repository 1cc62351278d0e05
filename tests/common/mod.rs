//! Shared test infrastructure for zone-manager integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use zone_manager::central::{CentralApi, NotifyApi, StorageCentral};
use zone_manager::config::{DelayedNotifyConfig, ZonePurgeConfig};
use zone_manager::model::{Record, RecordSet, RecordSetCriterion, RecordType, Zone, ZoneExport};
use zone_manager::resolver::StaticResolver;
use zone_manager::storage::MemoryStorage;
use zone_manager::transaction::{TransactionConfig, TransactionRunner};
use zone_manager::{AliasFlattener, RequestContext, Result};

// --- Constants ---

pub const ZONE_NAME: &str = "example.org.";
pub const TARGET: &str = "lb.example.net.";

// --- RecordingCentral ---

/// Central API that forwards to a real one and records every call.
pub struct RecordingCentral {
    inner: Arc<dyn CentralApi>,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingCentral {
    pub fn new(inner: Arc<dyn CentralApi>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made to `method`.
    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| **m == method).count()
    }

    /// Every call in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().push(method);
    }
}

#[async_trait]
impl CentralApi for RecordingCentral {
    async fn get_zone(&self, ctx: &RequestContext, zone_id: Uuid) -> Result<Zone> {
        self.record("get_zone");
        self.inner.get_zone(ctx, zone_id).await
    }

    async fn find_recordset(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<RecordSet> {
        self.record("find_recordset");
        self.inner.find_recordset(ctx, criterion).await
    }

    async fn find_recordsets(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<Vec<RecordSet>> {
        self.record("find_recordsets");
        self.inner.find_recordsets(ctx, criterion).await
    }

    async fn create_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> Result<RecordSet> {
        self.record("create_recordset");
        self.inner.create_recordset(ctx, zone_id, recordset).await
    }

    async fn update_recordset(
        &self,
        ctx: &RequestContext,
        recordset: RecordSet,
    ) -> Result<RecordSet> {
        self.record("update_recordset");
        self.inner.update_recordset(ctx, recordset).await
    }

    async fn delete_recordset(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset_id: Uuid,
    ) -> Result<RecordSet> {
        self.record("delete_recordset");
        self.inner.delete_recordset(ctx, zone_id, recordset_id).await
    }

    async fn count_recordsets(
        &self,
        ctx: &RequestContext,
        criterion: &RecordSetCriterion,
    ) -> Result<usize> {
        self.record("count_recordsets");
        self.inner.count_recordsets(ctx, criterion).await
    }

    async fn update_zone_export(
        &self,
        ctx: &RequestContext,
        export: ZoneExport,
    ) -> Result<ZoneExport> {
        self.record("update_zone_export");
        self.inner.update_zone_export(ctx, export).await
    }
}

// --- RecordingNotifier ---

/// Propagation sink that remembers which zones it was asked to push.
#[derive(Default)]
pub struct RecordingNotifier {
    zones: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> usize {
        self.zones.lock().len()
    }

    pub fn zones(&self) -> Vec<Uuid> {
        self.zones.lock().clone()
    }
}

#[async_trait]
impl NotifyApi for RecordingNotifier {
    async fn update_zone(&self, _ctx: &RequestContext, zone: &Zone) -> Result<()> {
        self.zones.lock().push(zone.id);
        Ok(())
    }
}

// --- Harness ---

/// Storage, authoritative layer and reconciler wired together.
pub struct Harness {
    pub storage: MemoryStorage,
    pub runner: TransactionRunner,
    pub authority: Arc<StorageCentral>,
    pub central: Arc<RecordingCentral>,
    pub resolver: Arc<StaticResolver>,
    pub flattener: AliasFlattener,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transactions(fast_transactions())
    }

    pub fn with_transactions(config: TransactionConfig) -> Self {
        let storage = MemoryStorage::new();
        let runner = TransactionRunner::new(Arc::new(storage.clone()), config);
        let authority = Arc::new(StorageCentral::new(runner.clone()));
        let central = Arc::new(RecordingCentral::new(authority.clone()));
        let resolver = Arc::new(StaticResolver::new());
        let flattener = AliasFlattener::new(central.clone(), resolver.clone());

        Self {
            storage,
            runner,
            authority,
            central,
            resolver,
            flattener,
        }
    }

    pub async fn zone(&self, name: &str) -> Zone {
        self.authority
            .create_zone(&RequestContext::new(), Zone::new(name))
            .await
            .unwrap()
    }

    /// Create an ALIAS recordset at the apex of `zone` pointing at `targets`.
    pub async fn alias(&self, zone: &Zone, targets: &[&str]) -> RecordSet {
        self.authority
            .create_recordset(
                &RequestContext::new(),
                zone.id,
                alias_recordset(zone, targets),
            )
            .await
            .unwrap()
    }

    /// The mirrored A recordset of `zone`, if any.
    pub async fn mirror(&self, zone: &Zone) -> Option<RecordSet> {
        self.authority
            .find_recordset(
                &RequestContext::new(),
                &RecordSetCriterion::for_zone(zone.id).with_type(RecordType::A),
            )
            .await
            .ok()
    }
}

// --- Builders ---

pub fn fast_transactions() -> TransactionConfig {
    TransactionConfig {
        delay_ms: 1,
        ..Default::default()
    }
}

pub fn alias_recordset(zone: &Zone, targets: &[&str]) -> RecordSet {
    RecordSet::new(zone.id, zone.name.clone(), RecordType::ALIAS)
        .with_records(targets.iter().map(|t| Record::new(*t)).collect())
}

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub fn ips(list: &[&str]) -> Vec<Ipv4Addr> {
    list.iter().map(|s| ip(s)).collect()
}

pub fn purge_config(batch_size: usize) -> ZonePurgeConfig {
    ZonePurgeConfig {
        batch_size,
        ..Default::default()
    }
}

pub fn notify_config(batch_size: usize) -> DelayedNotifyConfig {
    DelayedNotifyConfig {
        interval: 1,
        batch_size,
    }
}

// --- Assertions ---

/// Assert the record payloads of `recordset`, ignoring order.
pub fn assert_addresses(recordset: &RecordSet, expected: &[&str]) {
    let mut actual = recordset.record_data();
    actual.sort();
    let mut expected = expected.to_vec();
    expected.sort();
    assert_eq!(actual, expected, "mirrored addresses differ");
}
