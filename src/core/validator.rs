//! Reference parsing and validation.
//!
//! Payload documents point at other records with reference strings of the
//! shape `"Kind/external-id"`. These are soft references: the storage engine
//! does not enforce them, so the validator checks them at write time (do the
//! targets resolve?) and at delete time (does anything still point here?).
//! It only reads; it never writes.

use std::fmt;

use serde_json::Value;

use crate::error::{ConflictError, ReferenceError, RegistryResult};
use crate::types::{KindDefinition, KindRegistry, SearchCriteria, VersionedRecord};

use super::storage::RecordStorage;

/// A parsed reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReference {
    kind: String,
    external_id: String,
}

impl RecordReference {
    /// Builds a reference to the given record.
    pub fn new(kind: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            external_id: external_id.into(),
        }
    }

    /// Parses a `"Kind/external-id"` string.
    ///
    /// Exactly one slash, non-empty on both sides; anything else is invalid.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let mut parts = reference.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(external_id), None) if !kind.is_empty() && !external_id.is_empty() => {
                Ok(Self {
                    kind: kind.to_string(),
                    external_id: external_id.to_string(),
                })
            }
            _ => Err(ReferenceError::Invalid {
                reference: reference.to_string(),
            }),
        }
    }

    /// Returns the referenced kind name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the referenced external id.
    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

impl fmt::Display for RecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.external_id)
    }
}

/// Validates references against the record store.
///
/// Invoked by record-kind services before every create/update (forward
/// checks) and before every delete (reverse check).
pub struct ReferenceValidator<'a, S: RecordStorage + ?Sized> {
    storage: &'a S,
    registry: &'a KindRegistry,
}

impl<'a, S: RecordStorage + ?Sized> ReferenceValidator<'a, S> {
    /// Creates a validator over the given store and kind registry.
    pub fn new(storage: &'a S, registry: &'a KindRegistry) -> Self {
        Self { storage, registry }
    }

    /// Checks that a reference string resolves to a current, non-deleted
    /// record of the expected kind.
    ///
    /// # Errors
    ///
    /// * `ReferenceError::Invalid` — not of the form "Kind/id"
    /// * `ReferenceError::WrongType` — kind differs from `expected`
    /// * `ReferenceError::Unresolved` — no current, non-deleted target
    pub async fn validate_reference(
        &self,
        reference: &str,
        expected: &KindDefinition,
    ) -> RegistryResult<()> {
        let parsed = RecordReference::parse(reference)?;
        if parsed.kind() != expected.name() {
            return Err(ReferenceError::WrongType {
                reference: reference.to_string(),
                expected: expected.name().to_string(),
            }
            .into());
        }

        let current = self
            .storage
            .get_current(expected, parsed.external_id())
            .await?;
        if current.is_none() {
            return Err(ReferenceError::Unresolved {
                reference: reference.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Validates every reference in a list, failing on the first bad entry.
    pub async fn validate_list<I, R>(
        &self,
        references: I,
        expected: &KindDefinition,
    ) -> RegistryResult<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        for reference in references {
            self.validate_reference(reference.as_ref(), expected).await?;
        }
        Ok(())
    }

    /// Validates every reference a payload holds in the kind's declared
    /// reference fields, each against its declared target kind.
    pub async fn validate_payload(
        &self,
        kind: &KindDefinition,
        payload: &Value,
    ) -> RegistryResult<()> {
        for field in kind.reference_fields() {
            let references = field.extract(kind.name(), payload)?;
            if references.is_empty() {
                continue;
            }
            let Some(target) = self.registry.get(field.target) else {
                tracing::warn!(
                    kind = kind.name(),
                    field = field.field,
                    target = field.target,
                    "reference field targets an unregistered kind"
                );
                return Err(ReferenceError::Unresolved {
                    reference: references[0].clone(),
                }
                .into());
            };
            self.validate_list(&references, target).await?;
        }
        Ok(())
    }

    /// Returns the current, non-deleted records of any kind that still
    /// reference the given record.
    ///
    /// Rows of the target's own chain are excluded; a record referencing
    /// itself does not count.
    pub async fn referencing_records(
        &self,
        kind: &KindDefinition,
        external_id: &str,
    ) -> RegistryResult<Vec<VersionedRecord>> {
        let target = RecordReference::new(kind.name(), external_id).to_string();
        let mut referencing = Vec::new();

        for holder in self.registry.kinds() {
            let fields = holder.reference_fields_targeting(kind.name());
            if fields.is_empty() {
                continue;
            }
            let criteria = SearchCriteria::new().any_reference(&fields, &target);
            let hits = self.storage.find(holder, &criteria).await?;
            referencing.extend(hits.into_iter().filter(|record| {
                !(record.kind() == kind.name() && record.external_id() == external_id)
            }));
        }

        Ok(referencing)
    }

    /// Enforces deletion-time referential integrity.
    ///
    /// # Errors
    ///
    /// `ConflictError::ReferencedBy` naming one of the referencing records
    /// while any current, non-deleted record still points at the target.
    pub async fn guard_delete(
        &self,
        kind: &KindDefinition,
        external_id: &str,
    ) -> RegistryResult<()> {
        let referencing = self.referencing_records(kind, external_id).await?;
        if let Some(first) = referencing.first() {
            return Err(ConflictError::ReferencedBy {
                kind: kind.name().to_string(),
                external_id: external_id.to_string(),
                referencing: first.url(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_reference() {
        let parsed = RecordReference::parse("Organization/abc-123").unwrap();
        assert_eq!(parsed.kind(), "Organization");
        assert_eq!(parsed.external_id(), "abc-123");
        assert_eq!(parsed.to_string(), "Organization/abc-123");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["Organization", "Organization/", "/abc", "A/b/c", ""] {
            assert!(
                RecordReference::parse(bad).is_err(),
                "expected parse failure for {:?}",
                bad
            );
        }
    }
}
