//! History and search bundle assembly.
//!
//! Walks a set of version rows and produces an ordered collection of entries
//! ready for exchange-format rendering (rendering itself lives elsewhere).
//! History bundles come newest-first and carry the request/response envelope
//! of each version; searchset bundles carry payloads only. A tombstone entry
//! has a null payload — consumers must read that as "this version is a
//! deletion", not as missing data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EnvelopeRequest, EnvelopeResponse, VersionedRecord};

/// The kind of collection a bundle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    /// Results of a current-view search.
    Searchset,
    /// An ordered version history.
    History,
}

/// One entry in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    /// Versioned path of the entry ("Kind/external-id/_history/version").
    pub full_url: String,

    /// The version's payload; `None` for tombstones.
    pub payload: Option<Value>,

    /// Request descriptor of the mutation that produced the version.
    /// Present in history bundles only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<EnvelopeRequest>,

    /// Response descriptor of the mutation that produced the version.
    /// Present in history bundles only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<EnvelopeResponse>,
}

/// An ordered collection of version entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    /// Collection kind.
    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    /// Number of entries.
    pub total: usize,

    /// The entries, in the order dictated by the bundle type.
    pub entry: Vec<BundleEntry>,
}

fn entry_from_record(record: VersionedRecord, with_envelope: bool) -> BundleEntry {
    let full_url = record.versioned_url();
    let envelope = record.envelope_meta().clone();
    BundleEntry {
        full_url,
        payload: record.into_payload(),
        request: with_envelope.then_some(envelope.request),
        response: with_envelope.then_some(envelope.response),
    }
}

/// Assembles a history bundle, newest version first.
///
/// Rows are reordered by `(modified_at, version)` descending so callers may
/// pass chains in any order. Tombstones are kept.
pub fn assemble_history(records: impl IntoIterator<Item = VersionedRecord>) -> Bundle {
    let mut records: Vec<VersionedRecord> = records.into_iter().collect();
    records.sort_by(|a, b| {
        b.modified_at()
            .cmp(&a.modified_at())
            .then(b.version().cmp(&a.version()))
    });

    let entry: Vec<BundleEntry> = records
        .into_iter()
        .map(|record| entry_from_record(record, true))
        .collect();

    Bundle {
        bundle_type: BundleType::History,
        total: entry.len(),
        entry,
    }
}

/// Assembles a searchset bundle in the given order, payloads only.
pub fn assemble_searchset(records: impl IntoIterator<Item = VersionedRecord>) -> Bundle {
    let entry: Vec<BundleEntry> = records
        .into_iter()
        .map(|record| entry_from_record(record, false))
        .collect();

    Bundle {
        bundle_type: BundleType::Searchset,
        total: entry.len(),
        entry,
    }
}
