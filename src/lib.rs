//! Versioned resource store for healthcare provider registries.
//!
//! Every logical record is a chain of immutable version rows sharing a stable
//! external id: creates start a chain, updates append, deletes append a
//! tombstone. Exactly one row per chain is the latest, and current views
//! exclude tombstones while history reads see everything.
//!
//! The store is generic over resource kinds: each [`KindDefinition`] names a
//! kind, its optional natural-key rule, and the payload fields that reference
//! other records. Soft references (`"Kind/external-id"` strings) are checked
//! by the [`ReferenceValidator`] at write time and guard deletions in reverse.
//!
//! # Example
//!
//! ```no_run
//! use provider_registry::{KindRegistry, RecordStorage, SqliteBackend};
//! use serde_json::json;
//!
//! # async fn run() -> provider_registry::RegistryResult<()> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! let registry = KindRegistry::provider_directory();
//! let organization = registry.get("Organization").unwrap();
//!
//! let record = backend
//!     .create(
//!         organization,
//!         json!({
//!             "name": "Example Clinic",
//!             "identifier": [
//!                 {"system": "http://fhir.nl/fhir/NamingSystem/ura", "value": "12345678"}
//!             ]
//!         }),
//!     )
//!     .await?;
//! assert_eq!(record.version(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod types;

pub use error::{
    BackendError, ConflictError, PayloadError, RecordError, ReferenceError, RegistryError,
    RegistryResult,
};

pub use types::{
    Cardinality, Criterion, EnvelopeMeta, EnvelopeRequest, EnvelopeResponse, Interaction,
    KindDefinition, KindRegistry, ReferenceField, SearchCriteria, VersionedRecord,
};

pub use crate::core::{
    Bundle, BundleEntry, BundleType, RecordReference, RecordStorage, ReferenceValidator,
    assemble_history, assemble_searchset,
};

#[cfg(feature = "sqlite")]
pub use backends::sqlite::{SqliteBackend, SqliteBackendConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
