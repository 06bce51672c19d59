//! Core record storage trait.
//!
//! [`RecordStorage`] is the uniform contract every resource kind is served
//! through. The operations are implemented once per backend; everything
//! kind-specific arrives as a [`KindDefinition`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RegistryResult;
use crate::types::{KindDefinition, SearchCriteria, VersionedRecord};

/// Storage contract for versioned registry records.
///
/// # Versioning model
///
/// Every mutation appends an immutable version row; version numbers within
/// one external id are gapless, starting at 1. Exactly one row per external
/// id is the latest. Deletes append a tombstone (no payload, `deleted`);
/// there is no hard delete.
///
/// # Concurrency
///
/// Mutations are short-lived transactions. The new version number is computed
/// from the current row read inside the same transaction; a lost race against
/// a concurrent writer shows up as a uniqueness violation on
/// `(kind, external_id, version)` and is retried internally from a fresh read
/// a bounded number of times.
///
/// All operations may block on storage I/O; callers must not invoke them
/// while holding an in-process lock needed elsewhere.
#[async_trait]
pub trait RecordStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Creates version 1 of a new record.
    ///
    /// The external id is taken from the payload's `id` field when present
    /// (and must be fresh), otherwise generated. When the kind declares a
    /// natural key, it is extracted from the payload and must not collide
    /// with any current, non-deleted record of the kind.
    ///
    /// # Errors
    ///
    /// * `ConflictError::DuplicateExternalId` — a chain already exists for the id
    /// * `ConflictError::DuplicateNaturalKey` — natural key held by another current record
    /// * `PayloadError` — payload is not an object, or the natural key is missing
    async fn create(
        &self,
        kind: &KindDefinition,
        payload: Value,
    ) -> RegistryResult<VersionedRecord>;

    /// Returns the current version: the latest, non-deleted row for the id.
    ///
    /// Returns `Ok(None)` when no chain exists or the record is deleted.
    async fn get_current(
        &self,
        kind: &KindDefinition,
        external_id: &str,
    ) -> RegistryResult<Option<VersionedRecord>>;

    /// Returns an exact historical version regardless of latest/deleted state.
    async fn get_version(
        &self,
        kind: &KindDefinition,
        external_id: &str,
        version: i64,
    ) -> RegistryResult<Option<VersionedRecord>>;

    /// Finds records matching the criteria.
    ///
    /// Restricted to the current view unless the criteria lift it; with
    /// `sort_history` results come newest first.
    async fn find(
        &self,
        kind: &KindDefinition,
        criteria: &SearchCriteria,
    ) -> RegistryResult<Vec<VersionedRecord>>;

    /// Appends a new version with the given payload.
    ///
    /// Atomically flips the current row's latest flag off and inserts the
    /// next version. When the new payload equals the current one after
    /// stripping volatile envelope fields, returns the current record
    /// unchanged instead of writing a no-op version.
    ///
    /// # Errors
    ///
    /// * `RecordError::NotFound` — no current, non-deleted record for the id
    /// * `ConflictError::VersionRace` — retry budget exhausted under contention
    async fn update(
        &self,
        kind: &KindDefinition,
        current: &VersionedRecord,
        payload: Value,
    ) -> RegistryResult<VersionedRecord>;

    /// Appends a tombstone version for the record.
    ///
    /// Same atomic swap as `update`, with a null payload and `deleted` set.
    /// Referential-integrity checks are the caller's responsibility (see
    /// [`ReferenceValidator::guard_delete`](crate::core::validator::ReferenceValidator::guard_delete))
    /// and run before this call.
    ///
    /// # Errors
    ///
    /// * `RecordError::NotFound` — no current, non-deleted record for the id
    /// * `ConflictError::VersionRace` — retry budget exhausted under contention
    async fn delete(
        &self,
        kind: &KindDefinition,
        current: &VersionedRecord,
    ) -> RegistryResult<()>;
}
