//! Zone, recordset and record types shared by storage, central and tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::coordination::Partition;

/// Pending lifecycle operation on a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneAction {
    /// Zone is being created on the backends.
    Create,
    /// Zone changes are being propagated.
    Update,
    /// Zone is being removed from the backends.
    Delete,
    /// Nothing in flight.
    None,
}

/// Zone status as seen by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneStatus {
    /// Waiting for backends to converge.
    Pending,
    /// Served by all backends.
    Active,
    /// Backends failed to converge.
    Error,
    /// Soft-deleted, waiting for purge.
    Deleted,
}

/// A DNS zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone identity.
    pub id: Uuid,
    /// Fully qualified zone name, e.g. `example.org.`.
    pub name: String,
    /// Pending lifecycle operation.
    pub action: ZoneAction,
    /// Current status.
    pub status: ZoneStatus,
    /// When the zone was soft-deleted. Set once.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Set when a change is waiting for coalesced propagation.
    pub delayed_notify: bool,
    /// Change counter, only ever increases.
    pub serial: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Zone {
    /// Create a new pending zone with a random id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            action: ZoneAction::Create,
            status: ZoneStatus::Pending,
            deleted_at: None,
            delayed_notify: false,
            serial: 1,
            created_at: Utc::now(),
        }
    }

    /// Position of this zone in the shard keyspace.
    pub fn shard(&self) -> u16 {
        shard_of(&self.id)
    }

    /// True once the zone has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.status == ZoneStatus::Deleted
    }

    /// Soft-delete the zone. `deleted_at` keeps its first value.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
        self.status = ZoneStatus::Deleted;
        self.action = ZoneAction::None;
    }

    /// Advance the serial after a change.
    pub fn bump_serial(&mut self) {
        self.serial = self.serial.saturating_add(1);
    }
}

/// Shard of a zone id: the top 12 bits of the UUID.
pub fn shard_of(id: &Uuid) -> u16 {
    let bytes = id.as_bytes();
    (u16::from(bytes[0]) << 4) | u16::from(bytes[1] >> 4)
}

/// Resource record types known to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    /// IPv4 address.
    A,
    /// IPv6 address.
    AAAA,
    /// Canonical name.
    CNAME,
    /// Mail exchange.
    MX,
    /// Name server.
    NS,
    /// Start of authority.
    SOA,
    /// Text.
    TXT,
    /// Service locator.
    SRV,
    /// Pointer.
    PTR,
    /// Apex alias, flattened into A records before publication.
    ALIAS,
}

impl RecordType {
    /// Numeric type code. ALIAS uses the PowerDNS private code.
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::ALIAS => 260,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::SOA => "SOA",
            RecordType::TXT => "TXT",
            RecordType::SRV => "SRV",
            RecordType::PTR => "PTR",
            RecordType::ALIAS => "ALIAS",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "SOA" => Ok(RecordType::SOA),
            "TXT" => Ok(RecordType::TXT),
            "SRV" => Ok(RecordType::SRV),
            "PTR" => Ok(RecordType::PTR),
            "ALIAS" => Ok(RecordType::ALIAS),
            other => Err(format!("unknown record type: {other}")),
        }
    }
}

/// Which consumers may see a recordset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// API and DNS responders.
    #[default]
    All,
    /// DNS responders only (hidden from the management API).
    Mdns,
    /// Management API only (never published).
    Api,
}

impl Visibility {
    /// True if DNS responders should publish the recordset.
    pub fn is_published(&self) -> bool {
        !matches!(self, Visibility::Api)
    }

    /// True if the management API should list the recordset.
    pub fn is_api_visible(&self) -> bool {
        !matches!(self, Visibility::Mdns)
    }
}

/// A single resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record identity.
    pub id: Uuid,
    /// Type-specific payload, e.g. an address or a hostname.
    pub data: String,
    /// Derived by a reconciler; not hand-editable.
    #[serde(default)]
    pub managed: bool,
    /// Kind of resource that owns a managed record.
    #[serde(default)]
    pub managed_resource_type: Option<String>,
    /// Id of the source record that owns a managed record.
    #[serde(default)]
    pub managed_resource_id: Option<Uuid>,
}

impl Record {
    /// Create an unmanaged record.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: data.into(),
            managed: false,
            managed_resource_type: None,
            managed_resource_id: None,
        }
    }

    /// Create a record derived from `resource_id`.
    pub fn managed_by(
        data: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Uuid,
    ) -> Self {
        Self {
            managed: true,
            managed_resource_type: Some(resource_type.into()),
            managed_resource_id: Some(resource_id),
            ..Self::new(data)
        }
    }
}

/// A named set of records of one type inside a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Recordset identity.
    pub id: Uuid,
    /// Owning zone.
    pub zone_id: Uuid,
    /// Owner name.
    pub name: String,
    /// Record type.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// TTL in seconds; `None` inherits the zone default.
    pub ttl: Option<u32>,
    /// Consumer visibility.
    #[serde(default)]
    pub visible: Visibility,
    /// Ordered records.
    #[serde(default)]
    pub records: Vec<Record>,
}

impl RecordSet {
    /// Create an empty recordset.
    pub fn new(zone_id: Uuid, name: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone_id,
            name: name.into(),
            record_type,
            ttl: None,
            visible: Visibility::All,
            records: Vec::new(),
        }
    }

    /// Set the TTL.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visible: Visibility) -> Self {
        self.visible = visible;
        self
    }

    /// Replace the records.
    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    /// True if any record is reconciler-owned.
    pub fn has_managed_records(&self) -> bool {
        self.records.iter().any(|r| r.managed)
    }

    /// Record payloads in order.
    pub fn record_data(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.data.as_str()).collect()
    }
}

/// Progress of a zone export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportStatus {
    /// Accepted, not yet rendered.
    Pending,
    /// Rendered; `location` points at the result.
    Complete,
    /// Rejected; `message` says why.
    Error,
}

/// A request to export a zone, tracked by the authoritative layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneExport {
    /// Export identity.
    pub id: Uuid,
    /// Zone being exported.
    pub zone_id: Uuid,
    /// Current status.
    pub status: ExportStatus,
    /// Where the rendered zone can be fetched once complete.
    pub location: Option<String>,
    /// Failure reason.
    pub message: Option<String>,
}

impl ZoneExport {
    /// Pending export of `zone_id`.
    pub fn new(zone_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone_id,
            status: ExportStatus::Pending,
            location: None,
            message: None,
        }
    }

    /// Mark complete, served from `location`.
    pub fn complete(mut self, location: impl Into<String>) -> Self {
        self.status = ExportStatus::Complete;
        self.location = Some(location.into());
        self.message = None;
        self
    }

    /// Mark failed with `message`.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = ExportStatus::Error;
        self.message = Some(message.into());
        self
    }
}

/// Filter for recordset lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSetCriterion {
    /// Restrict to one recordset id.
    pub id: Option<Uuid>,
    /// Restrict to one zone.
    pub zone_id: Option<Uuid>,
    /// Restrict to one type.
    pub record_type: Option<RecordType>,
    /// Restrict to one owner name.
    pub name: Option<String>,
    /// Restrict to zones inside a partition.
    pub partition: Option<Partition>,
    /// Keyset marker: only rows ordered strictly after `(name, id)`.
    pub after: Option<(String, Uuid)>,
    /// Maximum rows returned by `find_recordsets`.
    pub limit: Option<usize>,
}

impl RecordSetCriterion {
    /// Criterion for a single recordset id.
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Criterion for all recordsets of `zone_id`.
    pub fn for_zone(zone_id: Uuid) -> Self {
        Self {
            zone_id: Some(zone_id),
            ..Default::default()
        }
    }

    /// Criterion for all recordsets of a type.
    pub fn of_type(record_type: RecordType) -> Self {
        Self {
            record_type: Some(record_type),
            ..Default::default()
        }
    }

    /// Restrict to a type.
    pub fn with_type(mut self, record_type: RecordType) -> Self {
        self.record_type = Some(record_type);
        self
    }

    /// Restrict to an owner name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to a partition.
    pub fn within(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Resume a listing after the last row of the previous page.
    pub fn after(mut self, last: &RecordSet) -> Self {
        self.after = Some((last.name.clone(), last.id));
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a recordset against every field except `limit`.
    pub fn matches(&self, recordset: &RecordSet) -> bool {
        self.id.map_or(true, |id| recordset.id == id)
            && self.zone_id.map_or(true, |id| recordset.zone_id == id)
            && self
                .record_type
                .map_or(true, |t| recordset.record_type == t)
            && self.name.as_ref().map_or(true, |n| &recordset.name == n)
            && self
                .partition
                .map_or(true, |p| p.contains(shard_of(&recordset.zone_id)))
            && self.after.as_ref().map_or(true, |(name, id)| {
                (&recordset.name, recordset.id) > (name, *id)
            })
    }
}
