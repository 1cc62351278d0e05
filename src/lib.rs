//! Zone Manager - the partitioned maintenance worker of a DNS zone control plane.
//!
//! Several equivalent workers split the zone keyspace between them and each
//! runs a set of interval-driven maintenance tasks against its own share.
//! All storage work goes through a reentrant transaction runner that retries
//! lock contention, and ALIAS recordsets are flattened into published A
//! recordsets by resolving their targets.
//!
//! ## Features
//!
//! - 4096-shard keyspace split into contiguous ranges by live membership
//! - Per-task timers that skip ticks on overrun and drain on shutdown
//! - Nested transactional calls collapse into one storage transaction
//! - Idempotent ALIAS to A flattening with full-replace reconciliation
//! - Fire-and-forget cast entry points for the API layer
//! - Synchronous zone export with a size limit
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          zone-manager                            │
//! │                                                                  │
//! │  ┌──────────────────┐   watch   ┌───────────────────┐            │
//! │  │ MembershipSource │──────────▶│ PartitionAssigner │            │
//! │  └──────────────────┘           └─────────┬─────────┘            │
//! │                                           │ current()            │
//! │                                           ▼                      │
//! │  ┌──────────────────┐           ┌───────────────────┐            │
//! │  │   TaskRegistry   │──────────▶│     Scheduler     │            │
//! │  └──────────────────┘           └─────────┬─────────┘            │
//! │        zone_purge / delayed_notify / flatten_alias               │
//! │                                           │                      │
//! │       ┌───────────────────┬───────────────┴──────┐               │
//! │       ▼                   ▼                      ▼               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐          │
//! │  │ Transaction  │  │  NotifyApi   │  │ AliasFlattener │◀── casts │
//! │  │   Runner     │  └──────────────┘  └───────┬────────┘          │
//! │  └──────┬───────┘                            │ CentralApi        │
//! │         ▼                                    ▼                   │
//! │  ┌──────────────┐                    ┌────────────────┐          │
//! │  │   Storage    │◀───────────────────│ StorageCentral │          │
//! │  └──────────────┘                    └────────────────┘          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use zone_manager::{Config, HickoryNameResolver, ZoneManagerService};
//!
//! #[tokio::main]
//! async fn main() -> zone_manager::Result<()> {
//!     let service = ZoneManagerService::builder(Config::default())
//!         .resolver(Arc::new(HickoryNameResolver::from_system_conf()?))
//!         .build()?;
//!
//!     let token = CancellationToken::new();
//!     service.run(token).await
//! }
//! ```

#![warn(missing_docs)]

pub mod alias;
pub mod central;
pub mod config;
pub mod context;
pub mod coordination;
pub mod error;
pub mod export;
pub mod metrics;
pub mod model;
pub mod resolver;
pub mod rpc;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod telemetry;
pub mod transaction;

// Re-export main types
pub use alias::AliasFlattener;
pub use central::{CentralApi, LoggingNotifier, NotifyApi, StorageCentral};
pub use config::{Config, ServiceConfig, TasksConfig, TelemetryConfig};
pub use context::RequestContext;
pub use coordination::{MembershipSource, Partition, PartitionAssigner, StaticMembership};
pub use error::{CentralError, Error, ResolveFailure, Result, RpcError, StorageError};
pub use export::ZoneExporter;
pub use model::{
    ExportStatus, Record, RecordSet, RecordSetCriterion, RecordType, Visibility, Zone, ZoneExport,
};
pub use resolver::{HickoryNameResolver, NameResolver, StaticResolver};
pub use rpc::{ChannelTransport, ZoneManagerApi, ZoneManagerCast};
pub use scheduler::{PeriodicTask, Scheduler, TaskDescriptor, TaskRegistry, TaskReport, TaskState};
pub use service::{ServiceBuilder, ZoneManagerService};
pub use storage::{MemoryStorage, Storage};
pub use transaction::{RetryClassifier, TransactionConfig, TransactionRunner};
