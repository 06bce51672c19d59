//! Error types for the registry store.
//!
//! Errors are layered by concern: record state, write conflicts, reference
//! validation, payload shape, and backend failures. Every failed mutation is
//! raised to the caller; nothing is logged-and-swallowed.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Record state errors (not found, version not found)
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Write conflicts (duplicate keys, deletion guard, version races)
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Reference validation errors
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Payload shape errors
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to record state.
///
/// Read operations that merely find nothing return `Ok(None)`; these variants
/// are for callers that stated an expectation of existence.
#[derive(Error, Debug)]
pub enum RecordError {
    /// No current, non-deleted record with this external id.
    #[error("record not found: {kind}/{external_id}")]
    NotFound { kind: String, external_id: String },

    /// The version chain has no row with this version number.
    #[error("version not found: {kind}/{external_id}/_history/{version}")]
    VersionNotFound {
        kind: String,
        external_id: String,
        version: i64,
    },
}

/// Errors raised when a write collides with existing state.
#[derive(Error, Debug)]
pub enum ConflictError {
    /// A record with this external id already has a version chain.
    #[error("record already exists: {kind}/{external_id}")]
    DuplicateExternalId { kind: String, external_id: String },

    /// Another current record of this kind already carries the natural key.
    #[error("natural key already in use for {kind}: {value}")]
    DuplicateNaturalKey { kind: String, value: String },

    /// Deletion blocked: other current records still reference this one.
    #[error("cannot delete {kind}/{external_id}: still referenced by {referencing}")]
    ReferencedBy {
        kind: String,
        external_id: String,
        referencing: String,
    },

    /// Concurrent writers raced on the same version chain and the bounded
    /// retry budget was exhausted. Retried internally before surfacing.
    #[error("version race on {kind}/{external_id} after {attempts} attempts")]
    VersionRace {
        kind: String,
        external_id: String,
        attempts: u32,
    },
}

/// Errors raised while validating reference strings in payloads.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// The string is not of the form "Kind/external-id".
    #[error("invalid reference: {reference}")]
    Invalid { reference: String },

    /// The reference names a different kind than the field allows.
    #[error("invalid reference {reference}: expected {expected}")]
    WrongType { reference: String, expected: String },

    /// The reference is well-formed but no current, non-deleted target exists.
    #[error("unresolved reference: {reference}")]
    Unresolved { reference: String },
}

/// Errors raised when a payload does not have the shape the store must read.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The payload is not a JSON object.
    #[error("payload for {kind} is not a JSON object")]
    NotAnObject { kind: String },

    /// The kind requires a natural key and none could be extracted.
    #[error("no identifier with system {system} in {kind} payload")]
    MissingNaturalKey { kind: String, system: String },

    /// A declared reference field holds something other than reference objects.
    #[error("malformed reference field {field} in {kind} payload")]
    MalformedReferenceField { kind: String, field: String },
}

/// Errors originating from the storage engine.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema initialization or migration error.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

// Implement conversions from common error types

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Backend(BackendError::Serialization {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for RegistryError {
    fn from(_err: r2d2::Error) -> Self {
        RegistryError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_display() {
        let err = RegistryError::Record(RecordError::NotFound {
            kind: "Organization".to_string(),
            external_id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "record not found: Organization/123");
    }

    #[test]
    fn test_version_not_found_display() {
        let err = RecordError::VersionNotFound {
            kind: "Endpoint".to_string(),
            external_id: "abc".to_string(),
            version: 4,
        };
        assert_eq!(err.to_string(), "version not found: Endpoint/abc/_history/4");
    }

    #[test]
    fn test_conflict_error_display() {
        let err = ConflictError::DuplicateNaturalKey {
            kind: "Organization".to_string(),
            value: "12345678".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "natural key already in use for Organization: 12345678"
        );

        let err = ConflictError::VersionRace {
            kind: "Organization".to_string(),
            external_id: "123".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_reference_error_display() {
        let err = ReferenceError::WrongType {
            reference: "Endpoint/1".to_string(),
            expected: "Organization".to_string(),
        };
        assert!(err.to_string().contains("expected Organization"));

        let err = ReferenceError::Unresolved {
            reference: "Organization/missing".to_string(),
        };
        assert_eq!(err.to_string(), "unresolved reference: Organization/missing");
    }

    #[test]
    fn test_registry_error_from_sub_errors() {
        let conflict = ConflictError::DuplicateExternalId {
            kind: "Organization".to_string(),
            external_id: "123".to_string(),
        };
        let err: RegistryError = conflict.into();
        assert!(matches!(err, RegistryError::Conflict(_)));

        let payload = PayloadError::NotAnObject {
            kind: "Endpoint".to_string(),
        };
        let err: RegistryError = payload.into();
        assert!(matches!(err, RegistryError::Payload(_)));
    }
}
