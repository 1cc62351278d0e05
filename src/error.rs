//! Error types for zone-manager.

use thiserror::Error;
use uuid::Uuid;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the zone manager.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Authoritative API refused or failed a call.
    #[error("Central error: {0}")]
    Central(#[from] CentralError),

    /// Outbound cast could not be delivered.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Name resolver could not be constructed.
    #[error("Resolver setup error: {0}")]
    Resolver(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No task registered under the given name.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error is a storage-level deadlock.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Deadlock(_)))
    }

    /// True when a recordset lookup found nothing.
    pub fn is_recordset_not_found(&self) -> bool {
        matches!(self, Error::Central(CentralError::RecordSetNotFound))
    }
}

/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind ("zone", "recordset").
        kind: &'static str,
        /// Lookup key.
        id: String,
    },

    /// Unique constraint violated.
    #[error("duplicate {kind}: {detail}")]
    Duplicate {
        /// Entity kind.
        kind: &'static str,
        /// Conflicting key.
        detail: String,
    },

    /// Lock contention between concurrent transactions.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// Commit or rollback issued without a matching begin.
    #[error("no transaction in progress")]
    NoTransaction,

    /// Any other backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Build a not-found error for a zone.
    pub fn zone_not_found(id: Uuid) -> Self {
        StorageError::NotFound {
            kind: "zone",
            id: id.to_string(),
        }
    }

    /// Build a not-found error for a recordset.
    pub fn recordset_not_found(id: impl ToString) -> Self {
        StorageError::NotFound {
            kind: "recordset",
            id: id.to_string(),
        }
    }
}

/// Domain errors from the authoritative API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CentralError {
    /// Zone does not exist.
    #[error("zone {0} not found")]
    ZoneNotFound(Uuid),

    /// No recordset matched the criterion.
    #[error("recordset not found")]
    RecordSetNotFound,

    /// Zone is deleted and may only be purged.
    #[error("zone {0} is deleted")]
    ZoneDeleted(Uuid),

    /// Recordset holds managed records and the caller may not edit them.
    #[error("recordset {0} holds managed records")]
    ManagedRecord(Uuid),
}

/// Outcome of a failed hostname lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    /// Name does not exist or has no A records.
    #[error("no such name: {0}")]
    NotFound(String),

    /// Resolver could not reach an upstream.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors delivering a cast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Receiving side is gone.
    #[error("cast channel closed")]
    ChannelClosed,
}
