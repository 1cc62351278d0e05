//! Fire-and-forget entry points exposed to the API layer.
//!
//! The API layer does not wait on reconciliation: it casts a
//! [`ZoneManagerCast`] and returns. The transport only has to deliver the
//! message; no reply travels back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::RpcError;
use crate::model::{RecordSet, ZoneExport};

/// Messages accepted by the zone manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ZoneManagerCast {
    /// Create or refresh the mirrored A recordset for an ALIAS recordset.
    FlattenAliasRecord {
        /// Zone holding the ALIAS recordset.
        zone_id: Uuid,
        /// The ALIAS recordset.
        recordset: RecordSet,
    },
    /// Remove the mirrored A recordset of a deleted ALIAS recordset.
    DeleteAliasRecord {
        /// Zone holding the ALIAS recordset.
        zone_id: Uuid,
        /// The removed ALIAS recordset.
        recordset: RecordSet,
    },
    /// Settle a pending zone export.
    StartZoneExport {
        /// Zone to export.
        zone_id: Uuid,
        /// The pending export.
        export: ZoneExport,
    },
}

impl ZoneManagerCast {
    /// Method name on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            ZoneManagerCast::FlattenAliasRecord { .. } => "flatten_alias_record",
            ZoneManagerCast::DeleteAliasRecord { .. } => "delete_alias_record",
            ZoneManagerCast::StartZoneExport { .. } => "start_zone_export",
        }
    }

    /// Target zone.
    pub fn zone_id(&self) -> Uuid {
        match self {
            ZoneManagerCast::FlattenAliasRecord { zone_id, .. }
            | ZoneManagerCast::DeleteAliasRecord { zone_id, .. }
            | ZoneManagerCast::StartZoneExport { zone_id, .. } => *zone_id,
        }
    }
}

/// One-way message delivery.
#[async_trait]
pub trait CastTransport: Send + Sync {
    /// Deliver `message` without waiting for it to be handled.
    async fn cast(&self, ctx: &RequestContext, message: ZoneManagerCast) -> Result<(), RpcError>;
}

/// Client used by the API layer to reach the zone manager.
#[derive(Clone)]
pub struct ZoneManagerApi {
    transport: Arc<dyn CastTransport>,
}

impl ZoneManagerApi {
    /// Client over `transport`.
    pub fn new(transport: Arc<dyn CastTransport>) -> Self {
        Self { transport }
    }

    /// Ask for the ALIAS recordset to be flattened.
    pub async fn flatten_alias_record(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> Result<(), RpcError> {
        self.transport
            .cast(ctx, ZoneManagerCast::FlattenAliasRecord { zone_id, recordset })
            .await
    }

    /// Ask for the artifacts of a removed ALIAS recordset to be deleted.
    pub async fn delete_alias_record(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        recordset: RecordSet,
    ) -> Result<(), RpcError> {
        self.transport
            .cast(ctx, ZoneManagerCast::DeleteAliasRecord { zone_id, recordset })
            .await
    }

    /// Ask for a pending zone export to be settled.
    pub async fn start_zone_export(
        &self,
        ctx: &RequestContext,
        zone_id: Uuid,
        export: ZoneExport,
    ) -> Result<(), RpcError> {
        self.transport
            .cast(ctx, ZoneManagerCast::StartZoneExport { zone_id, export })
            .await
    }
}

/// A delivered cast.
#[derive(Debug, Clone)]
pub struct CastEnvelope {
    /// Caller context, detached from the caller's transaction.
    pub ctx: RequestContext,
    /// Payload.
    pub message: ZoneManagerCast,
}

/// In-process transport over an unbounded channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<CastEnvelope>,
}

impl ChannelTransport {
    /// Transport and the receiving end for the service.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CastEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CastTransport for ChannelTransport {
    async fn cast(&self, ctx: &RequestContext, message: ZoneManagerCast) -> Result<(), RpcError> {
        debug!(
            request_id = %ctx.request_id(),
            method = message.method(),
            zone_id = %message.zone_id(),
            "casting"
        );
        self.tx
            .send(CastEnvelope {
                ctx: ctx.detached(),
                message,
            })
            .map_err(|_| RpcError::ChannelClosed)
    }
}
