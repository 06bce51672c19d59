//! Shared helpers for integration tests.

#![allow(dead_code)]

use provider_registry::{KindRegistry, SqliteBackend};
use serde_json::{Value, json};

/// An initialized in-memory backend.
pub fn test_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("create in-memory backend");
    backend.init_schema().expect("initialize schema");
    backend
}

/// The provider-directory kind set.
pub fn test_registry() -> KindRegistry {
    KindRegistry::provider_directory()
}

/// An organization payload carrying the URA natural-key identifier.
pub fn organization_payload(ura: &str, name: &str) -> Value {
    json!({
        "name": name,
        "active": true,
        "identifier": [
            {"system": "http://fhir.nl/fhir/NamingSystem/ura", "value": ura}
        ]
    })
}

/// An endpoint payload managed by the given organization reference.
pub fn endpoint_payload(organization_reference: &str) -> Value {
    json!({
        "status": "active",
        "address": "https://example.org/fhir",
        "managingOrganization": {"reference": organization_reference}
    })
}
