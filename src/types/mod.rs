//! Core types for versioned records, kind configuration, and search criteria.

pub mod criteria;
pub mod kind;
pub mod record;

pub use criteria::{Criterion, SearchCriteria};
pub use kind::{Cardinality, KindDefinition, KindRegistry, NaturalKey, ReferenceField};
pub use record::{
    EnvelopeMeta, EnvelopeRequest, EnvelopeResponse, Interaction, VersionedRecord,
    stamp_payload_meta, strip_volatile,
};
