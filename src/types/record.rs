//! Versioned record types.
//!
//! This module defines [`VersionedRecord`], one row in a record's version
//! chain, plus the [`EnvelopeMeta`] synthesized for every version describing
//! how it was produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One version row of a logical registry record.
///
/// Every mutation of a record appends one of these; rows are never mutated
/// after creation except for the `latest` flag, which moves to the newest row.
/// Among all rows sharing an `external_id`, exactly one has `latest = true`.
///
/// A row with `deleted = true` is a tombstone: it carries no payload and is
/// excluded from every current view, but remains reachable through history
/// reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Surrogate identity of this specific version row. Never reused.
    internal_id: i64,

    /// The resource kind this record belongs to (e.g. "Organization").
    kind: String,

    /// Stable identifier shared by every version of the logical record.
    external_id: String,

    /// Version number, 1 for the first version, +1 per mutation.
    version: i64,

    /// Whether this row is the current version of its chain.
    latest: bool,

    /// Whether this row is a tombstone.
    deleted: bool,

    /// The record's document payload; `None` exactly when `deleted`.
    payload: Option<Value>,

    /// Exchange-protocol descriptors for the mutation that produced this row.
    envelope_meta: EnvelopeMeta,

    /// Natural key extracted from the payload at write time, if the kind has one.
    natural_key: Option<String>,

    /// When this version row was written. Immutable.
    created_at: DateTime<Utc>,

    /// When the logical record was last modified as of this version.
    modified_at: DateTime<Utc>,
}

impl VersionedRecord {
    /// Reconstructs a record from storage columns.
    #[allow(clippy::too_many_arguments)]
    pub fn from_storage(
        internal_id: i64,
        kind: impl Into<String>,
        external_id: impl Into<String>,
        version: i64,
        latest: bool,
        deleted: bool,
        payload: Option<Value>,
        envelope_meta: EnvelopeMeta,
        natural_key: Option<String>,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            internal_id,
            kind: kind.into(),
            external_id: external_id.into(),
            version,
            latest,
            deleted,
            payload,
            envelope_meta,
            natural_key,
            created_at,
            modified_at,
        }
    }

    /// Returns the surrogate id of this version row.
    pub fn internal_id(&self) -> i64 {
        self.internal_id
    }

    /// Returns the resource kind name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the stable external identifier.
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Returns the version number of this row.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns `true` if this row is the current version of its chain.
    pub fn is_latest(&self) -> bool {
        self.latest
    }

    /// Returns `true` if this row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns the document payload, or `None` for a tombstone.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Consumes self and returns the payload.
    pub fn into_payload(self) -> Option<Value> {
        self.payload
    }

    /// Returns the envelope metadata for this version.
    pub fn envelope_meta(&self) -> &EnvelopeMeta {
        &self.envelope_meta
    }

    /// Returns the natural key captured at write time, if any.
    pub fn natural_key(&self) -> Option<&str> {
        self.natural_key.as_deref()
    }

    /// Returns when this version row was written.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the modification timestamp carried by this version.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Returns the unversioned path of the record (e.g. "Organization/123").
    pub fn url(&self) -> String {
        format!("{}/{}", self.kind, self.external_id)
    }

    /// Returns the versioned path (e.g. "Organization/123/_history/2").
    pub fn versioned_url(&self) -> String {
        format!("{}/{}/_history/{}", self.kind, self.external_id, self.version)
    }

    /// Returns the weak ETag for this version.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }
}

/// The kind of mutation that produced a version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    /// First version of a record.
    Create,
    /// A subsequent payload revision.
    Update,
    /// A tombstone.
    Delete,
}

impl Interaction {
    /// The exchange-protocol method synthesized for this interaction.
    pub fn method(self) -> &'static str {
        match self {
            Interaction::Create => "POST",
            Interaction::Update => "PUT",
            Interaction::Delete => "DELETE",
        }
    }

    /// The exchange-protocol status synthesized for this interaction.
    pub fn status(self) -> &'static str {
        match self {
            Interaction::Create => "201 Created",
            Interaction::Update => "200 OK",
            Interaction::Delete => "204 No Content",
        }
    }
}

impl std::fmt::Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interaction::Create => write!(f, "create"),
            Interaction::Update => write!(f, "update"),
            Interaction::Delete => write!(f, "delete"),
        }
    }
}

/// Synthesized request descriptor for a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeRequest {
    /// Exchange-protocol method ("POST", "PUT", "DELETE").
    pub method: String,
    /// Versioned record url.
    pub url: String,
}

/// Synthesized response descriptor for a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeResponse {
    /// Exchange-protocol status line.
    pub status: String,
    /// Weak ETag derived from the version number.
    pub etag: String,
}

/// Metadata describing how a version row was produced.
///
/// Used only for history/audit replay, never for business logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// The mutation kind that produced the row.
    pub interaction: Interaction,
    /// Synthesized request descriptor.
    pub request: EnvelopeRequest,
    /// Synthesized response descriptor.
    pub response: EnvelopeResponse,
}

impl EnvelopeMeta {
    /// Synthesizes envelope metadata for a new version row.
    pub fn synthesize(
        kind: &str,
        external_id: &str,
        version: i64,
        interaction: Interaction,
    ) -> Self {
        Self {
            interaction,
            request: EnvelopeRequest {
                method: interaction.method().to_string(),
                url: format!("{}/{}/_history/{}", kind, external_id, version),
            },
            response: EnvelopeResponse {
                status: interaction.status().to_string(),
                etag: format!("W/\"{}\"", version),
            },
        }
    }
}

/// Refreshes the payload's audit block for a new version.
///
/// Every stored payload carries `meta.versionId` and `meta.lastUpdated`
/// reflecting the version row it belongs to. Any caller-supplied `meta` is
/// replaced; it is volatile by contract.
pub fn stamp_payload_meta(payload: &mut Value, version: i64, at: DateTime<Utc>) {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(
            "meta".to_string(),
            serde_json::json!({
                "versionId": version,
                "lastUpdated": at.to_rfc3339(),
            }),
        );
    }
}

/// Returns a copy of the payload with volatile envelope fields removed.
///
/// Used to decide whether an update actually changes anything.
pub fn strip_volatile(payload: &Value) -> Value {
    let mut stripped = payload.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove("meta");
    }
    stripped
}
