//! SQLite implementation of the record storage contract.
//!
//! Mutations run as short `BEGIN IMMEDIATE` transactions: the current version
//! is re-read inside the transaction, its latest flag flipped off, and the new
//! row inserted in one atomic step. The uniqueness constraint on
//! `(resource_type, external_id, version)` is the backstop against writers
//! racing on one chain; a lost race is retried from a fresh read a bounded
//! number of times before surfacing as a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter,
};
use serde_json::Value;
use uuid::Uuid;

use crate::core::storage::RecordStorage;
use crate::error::{
    BackendError, ConflictError, PayloadError, RecordError, RegistryError, RegistryResult,
};
use crate::types::{
    EnvelopeMeta, Interaction, KindDefinition, SearchCriteria, VersionedRecord,
    stamp_payload_meta, strip_volatile,
};

use super::backend::SqliteBackend;
use super::query_builder::{CriteriaBuilder, RECORD_COLUMNS};

/// How many fresh-read attempts a mutation gets when losing version races.
const VERSION_RETRY_LIMIT: u32 = 3;

fn serialization_error(message: impl Into<String>) -> RegistryError {
    RegistryError::Backend(BackendError::Serialization {
        message: message.into(),
    })
}

/// Raw column values of one `records` row, in [`RECORD_COLUMNS`] order.
struct RawRecordRow {
    internal_id: i64,
    resource_type: String,
    external_id: String,
    version: i64,
    latest: bool,
    deleted: bool,
    payload: Option<String>,
    envelope_meta: String,
    natural_key: Option<String>,
    created_at: String,
    modified_at: String,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecordRow> {
    Ok(RawRecordRow {
        internal_id: row.get(0)?,
        resource_type: row.get(1)?,
        external_id: row.get(2)?,
        version: row.get(3)?,
        latest: row.get::<_, i64>(4)? != 0,
        deleted: row.get::<_, i64>(5)? != 0,
        payload: row.get(6)?,
        envelope_meta: row.get(7)?,
        natural_key: row.get(8)?,
        created_at: row.get(9)?,
        modified_at: row.get(10)?,
    })
}

fn parse_timestamp(text: &str) -> RegistryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| serialization_error(format!("invalid timestamp '{}': {}", text, e)))
}

impl RawRecordRow {
    fn into_record(self) -> RegistryResult<VersionedRecord> {
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;
        let envelope_meta: EnvelopeMeta = serde_json::from_str(&self.envelope_meta)?;
        let created_at = parse_timestamp(&self.created_at)?;
        let modified_at = parse_timestamp(&self.modified_at)?;

        Ok(VersionedRecord::from_storage(
            self.internal_id,
            self.resource_type,
            self.external_id,
            self.version,
            self.latest,
            self.deleted,
            payload,
            envelope_meta,
            self.natural_key,
            created_at,
            modified_at,
        ))
    }
}

/// Outcome of an insert that hit a constraint.
enum InsertFailure {
    /// The `(resource_type, external_id, version)` slot is already taken.
    VersionTaken,
    /// Another current record holds the natural key.
    NaturalKeyTaken,
    /// Anything else.
    Other(rusqlite::Error),
}

fn classify_insert_error(err: rusqlite::Error) -> InsertFailure {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err
        && code.code == rusqlite::ErrorCode::ConstraintViolation
    {
        // SQLite names the constrained columns, not the index:
        // "UNIQUE constraint failed: records.resource_type, records.natural_key".
        if message.contains("records.natural_key") {
            return InsertFailure::NaturalKeyTaken;
        }
        if message.contains("records.version") {
            return InsertFailure::VersionTaken;
        }
    }
    InsertFailure::Other(err)
}

#[allow(clippy::too_many_arguments)]
fn insert_version(
    txn: &Transaction<'_>,
    kind: &str,
    external_id: &str,
    version: i64,
    deleted: bool,
    payload_text: Option<&str>,
    envelope_text: &str,
    natural_key: Option<&str>,
    at: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    txn.execute(
        "INSERT INTO records
            (resource_type, external_id, version, latest, deleted, payload,
             envelope_meta, natural_key, created_at, modified_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            kind,
            external_id,
            version,
            i64::from(deleted),
            payload_text,
            envelope_text,
            natural_key,
            at.to_rfc3339(),
        ],
    )?;
    Ok(txn.last_insert_rowid())
}

/// Reads the current (latest, non-deleted) row of a chain.
fn fetch_current(
    conn: &Connection,
    kind: &str,
    external_id: &str,
) -> RegistryResult<Option<VersionedRecord>> {
    let sql = format!(
        "SELECT {} FROM records
         WHERE resource_type = ?1 AND external_id = ?2 AND latest = 1 AND deleted = 0",
        RECORD_COLUMNS
    );
    let raw = conn
        .query_row(&sql, params![kind, external_id], read_raw)
        .optional()?;
    raw.map(RawRecordRow::into_record).transpose()
}

/// Checks whether another current chain of the kind holds the natural key.
fn natural_key_held_elsewhere(
    conn: &Connection,
    kind: &str,
    key: &str,
    excluding_external_id: Option<&str>,
) -> RegistryResult<bool> {
    let held: bool = match excluding_external_id {
        Some(external_id) => conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM records
             WHERE resource_type = ?1 AND natural_key = ?2
               AND latest = 1 AND deleted = 0 AND external_id != ?3)",
            params![kind, key, external_id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM records
             WHERE resource_type = ?1 AND natural_key = ?2
               AND latest = 1 AND deleted = 0)",
            params![kind, key],
            |row| row.get(0),
        )?,
    };
    Ok(held)
}

fn require_object(kind: &KindDefinition, payload: &Value) -> RegistryResult<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(PayloadError::NotAnObject {
            kind: kind.name().to_string(),
        }
        .into())
    }
}

/// Sets the payload's `id` field and refreshes its audit block.
fn prepare_payload(payload: &mut Value, external_id: &str, version: i64, at: DateTime<Utc>) {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("id".to_string(), Value::String(external_id.to_string()));
    }
    stamp_payload_meta(payload, version, at);
}

#[async_trait]
impl RecordStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(
        &self,
        kind: &KindDefinition,
        payload: Value,
    ) -> RegistryResult<VersionedRecord> {
        require_object(kind, &payload)?;

        let external_id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let natural_key = kind.extract_natural_key(&payload)?;

        let now = Utc::now();
        let mut payload = payload;
        prepare_payload(&mut payload, &external_id, 1, now);
        let envelope = EnvelopeMeta::synthesize(kind.name(), &external_id, 1, Interaction::Create);
        let envelope_text = serde_json::to_string(&envelope)?;

        let mut conn = self.get_connection()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Any row of any state claims the id: deleted chains keep their history.
        let chain_exists: bool = txn.query_row(
            "SELECT EXISTS (SELECT 1 FROM records
             WHERE resource_type = ?1 AND external_id = ?2)",
            params![kind.name(), external_id],
            |row| row.get(0),
        )?;
        if chain_exists {
            return Err(ConflictError::DuplicateExternalId {
                kind: kind.name().to_string(),
                external_id,
            }
            .into());
        }

        if let Some(key) = &natural_key
            && natural_key_held_elsewhere(&txn, kind.name(), key, None)?
        {
            return Err(ConflictError::DuplicateNaturalKey {
                kind: kind.name().to_string(),
                value: key.clone(),
            }
            .into());
        }

        let internal_id = insert_version(
            &txn,
            kind.name(),
            &external_id,
            1,
            false,
            Some(&payload.to_string()),
            &envelope_text,
            natural_key.as_deref(),
            now,
        )
        .map_err(|err| match classify_insert_error(err) {
            // A concurrent create slipped in between our checks and the insert.
            InsertFailure::VersionTaken => RegistryError::Conflict(
                ConflictError::DuplicateExternalId {
                    kind: kind.name().to_string(),
                    external_id: external_id.clone(),
                },
            ),
            InsertFailure::NaturalKeyTaken => RegistryError::Conflict(
                ConflictError::DuplicateNaturalKey {
                    kind: kind.name().to_string(),
                    value: natural_key.clone().unwrap_or_default(),
                },
            ),
            InsertFailure::Other(err) => err.into(),
        })?;
        txn.commit()?;

        tracing::debug!(kind = kind.name(), external_id = %external_id, "created record");
        Ok(VersionedRecord::from_storage(
            internal_id,
            kind.name(),
            external_id,
            1,
            true,
            false,
            Some(payload),
            envelope,
            natural_key,
            now,
            now,
        ))
    }

    async fn get_current(
        &self,
        kind: &KindDefinition,
        external_id: &str,
    ) -> RegistryResult<Option<VersionedRecord>> {
        let conn = self.get_connection()?;
        fetch_current(&conn, kind.name(), external_id)
    }

    async fn get_version(
        &self,
        kind: &KindDefinition,
        external_id: &str,
        version: i64,
    ) -> RegistryResult<Option<VersionedRecord>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {} FROM records
             WHERE resource_type = ?1 AND external_id = ?2 AND version = ?3",
            RECORD_COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![kind.name(), external_id, version], read_raw)
            .optional()?;
        raw.map(RawRecordRow::into_record).transpose()
    }

    async fn find(
        &self,
        kind: &KindDefinition,
        criteria: &SearchCriteria,
    ) -> RegistryResult<Vec<VersionedRecord>> {
        let conn = self.get_connection()?;
        let fragment = CriteriaBuilder::new(kind.name()).build(criteria);

        let mut stmt = conn.prepare(&fragment.sql)?;
        let raws = stmt
            .query_map(params_from_iter(fragment.params.iter()), read_raw)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawRecordRow::into_record).collect()
    }

    async fn update(
        &self,
        kind: &KindDefinition,
        current: &VersionedRecord,
        payload: Value,
    ) -> RegistryResult<VersionedRecord> {
        require_object(kind, &payload)?;

        let external_id = current.external_id().to_string();
        let natural_key = kind.extract_natural_key(&payload)?;
        let mut conn = self.get_connection()?;

        for attempt in 1..=VERSION_RETRY_LIMIT {
            let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(fresh) = fetch_current(&txn, kind.name(), &external_id)? else {
                return Err(RecordError::NotFound {
                    kind: kind.name().to_string(),
                    external_id,
                }
                .into());
            };

            // Identical content gets no new version.
            let unchanged = fresh
                .payload()
                .is_some_and(|existing| strip_volatile(existing) == strip_volatile(&payload));
            if unchanged {
                drop(txn);
                tracing::debug!(
                    kind = kind.name(),
                    external_id = %external_id,
                    "update carries no changes, keeping current version"
                );
                return Ok(fresh);
            }

            if let Some(key) = &natural_key
                && natural_key_held_elsewhere(&txn, kind.name(), key, Some(&external_id))?
            {
                return Err(ConflictError::DuplicateNaturalKey {
                    kind: kind.name().to_string(),
                    value: key.clone(),
                }
                .into());
            }

            let new_version = fresh.version() + 1;
            let now = Utc::now();
            let mut stamped = payload.clone();
            prepare_payload(&mut stamped, &external_id, new_version, now);
            let envelope = EnvelopeMeta::synthesize(
                kind.name(),
                &external_id,
                new_version,
                Interaction::Update,
            );
            let envelope_text = serde_json::to_string(&envelope)?;

            txn.execute(
                "UPDATE records SET latest = 0
                 WHERE resource_type = ?1 AND external_id = ?2 AND latest = 1",
                params![kind.name(), external_id],
            )?;
            match insert_version(
                &txn,
                kind.name(),
                &external_id,
                new_version,
                false,
                Some(&stamped.to_string()),
                &envelope_text,
                natural_key.as_deref(),
                now,
            ) {
                Ok(internal_id) => {
                    txn.commit()?;
                    tracing::debug!(
                        kind = kind.name(),
                        external_id = %external_id,
                        version = new_version,
                        "updated record"
                    );
                    return Ok(VersionedRecord::from_storage(
                        internal_id,
                        kind.name(),
                        external_id,
                        new_version,
                        true,
                        false,
                        Some(stamped),
                        envelope,
                        natural_key,
                        now,
                        now,
                    ));
                }
                Err(err) => match classify_insert_error(err) {
                    InsertFailure::VersionTaken => {
                        drop(txn);
                        tracing::warn!(
                            kind = kind.name(),
                            external_id = %external_id,
                            attempt,
                            "lost version race, retrying from fresh read"
                        );
                    }
                    InsertFailure::NaturalKeyTaken => {
                        return Err(ConflictError::DuplicateNaturalKey {
                            kind: kind.name().to_string(),
                            value: natural_key.unwrap_or_default(),
                        }
                        .into());
                    }
                    InsertFailure::Other(err) => return Err(err.into()),
                },
            }
        }

        Err(ConflictError::VersionRace {
            kind: kind.name().to_string(),
            external_id,
            attempts: VERSION_RETRY_LIMIT,
        }
        .into())
    }

    async fn delete(
        &self,
        kind: &KindDefinition,
        current: &VersionedRecord,
    ) -> RegistryResult<()> {
        let external_id = current.external_id().to_string();
        let mut conn = self.get_connection()?;

        for attempt in 1..=VERSION_RETRY_LIMIT {
            let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(fresh) = fetch_current(&txn, kind.name(), &external_id)? else {
                return Err(RecordError::NotFound {
                    kind: kind.name().to_string(),
                    external_id,
                }
                .into());
            };

            let new_version = fresh.version() + 1;
            let now = Utc::now();
            let envelope = EnvelopeMeta::synthesize(
                kind.name(),
                &external_id,
                new_version,
                Interaction::Delete,
            );
            let envelope_text = serde_json::to_string(&envelope)?;

            txn.execute(
                "UPDATE records SET latest = 0
                 WHERE resource_type = ?1 AND external_id = ?2 AND latest = 1",
                params![kind.name(), external_id],
            )?;
            // The tombstone keeps the natural key for auditability; the
            // partial uniqueness index ignores deleted rows, so the key is
            // free for reuse from here on.
            match insert_version(
                &txn,
                kind.name(),
                &external_id,
                new_version,
                true,
                None,
                &envelope_text,
                fresh.natural_key(),
                now,
            ) {
                Ok(_) => {
                    txn.commit()?;
                    tracing::debug!(
                        kind = kind.name(),
                        external_id = %external_id,
                        version = new_version,
                        "deleted record"
                    );
                    return Ok(());
                }
                Err(err) => match classify_insert_error(err) {
                    InsertFailure::VersionTaken => {
                        drop(txn);
                        tracing::warn!(
                            kind = kind.name(),
                            external_id = %external_id,
                            attempt,
                            "lost version race, retrying from fresh read"
                        );
                    }
                    InsertFailure::NaturalKeyTaken | InsertFailure::Other(_) => {
                        return Err(RegistryError::Backend(BackendError::Internal {
                            backend_name: "sqlite".to_string(),
                            message: "unexpected constraint while writing tombstone".to_string(),
                            source: None,
                        }));
                    }
                },
            }
        }

        Err(ConflictError::VersionRace {
            kind: kind.name().to_string(),
            external_id,
            attempts: VERSION_RETRY_LIMIT,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::schema::initialize_schema;

    #[test]
    fn test_classify_version_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO records
            (resource_type, external_id, version, latest, deleted, payload, envelope_meta, created_at, modified_at)
            VALUES ('Organization', 'org-1', 1, 0, 0, '{}', '{}', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        conn.execute(insert, []).unwrap();
        let err = conn.execute(insert, []).unwrap_err();

        assert!(matches!(
            classify_insert_error(err),
            InsertFailure::VersionTaken
        ));
    }

    #[test]
    fn test_classify_natural_key_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = |external_id: &str, version: i64| {
            conn.execute(
                "INSERT INTO records
                    (resource_type, external_id, version, latest, deleted, payload, envelope_meta, natural_key, created_at, modified_at)
                    VALUES ('Organization', ?1, ?2, 1, 0, '{}', '{}', '12345678', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                params![external_id, version],
            )
        };
        insert("org-1", 1).unwrap();
        let err = insert("org-2", 1).unwrap_err();

        assert!(matches!(
            classify_insert_error(err),
            InsertFailure::NaturalKeyTaken
        ));
    }

    #[test]
    fn test_raw_row_parses_timestamps() {
        let raw = RawRecordRow {
            internal_id: 1,
            resource_type: "Organization".to_string(),
            external_id: "org-1".to_string(),
            version: 1,
            latest: true,
            deleted: false,
            payload: Some("{\"name\":\"Clinic\"}".to_string()),
            envelope_meta: serde_json::to_string(&EnvelopeMeta::synthesize(
                "Organization",
                "org-1",
                1,
                Interaction::Create,
            ))
            .unwrap(),
            natural_key: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            modified_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let record = raw.into_record().unwrap();
        assert_eq!(record.version(), 1);
        assert_eq!(record.payload().unwrap()["name"], "Clinic");
    }

    #[test]
    fn test_bad_timestamp_is_serialization_error() {
        assert!(parse_timestamp("not a timestamp").is_err());
    }
}
