//! Forward reference validation and the deletion guard.

mod common;

use common::{endpoint_payload, organization_payload, test_backend, test_registry};
use provider_registry::{
    ConflictError, RecordStorage, ReferenceError, ReferenceValidator, RegistryError,
};
use serde_json::json;

#[tokio::test]
async fn test_unresolved_reference_is_rejected() {
    let backend = test_backend();
    let registry = test_registry();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let payload = endpoint_payload("Organization/does-not-exist");
    let err = validator
        .validate_payload(endpoint, &payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Reference(ReferenceError::Unresolved { .. })
    ));
}

#[tokio::test]
async fn test_resolved_reference_passes() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let parent = backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();

    let payload = endpoint_payload(&parent.url());
    validator.validate_payload(endpoint, &payload).await.unwrap();
}

#[tokio::test]
async fn test_wrong_kind_reference_is_rejected() {
    let backend = test_backend();
    let registry = test_registry();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    // managingOrganization must point at an Organization.
    let payload = endpoint_payload("Endpoint/other");
    let err = validator
        .validate_payload(endpoint, &payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Reference(ReferenceError::WrongType { .. })
    ));
}

#[tokio::test]
async fn test_malformed_reference_is_rejected() {
    let backend = test_backend();
    let registry = test_registry();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let payload = endpoint_payload("no-slash-here");
    let err = validator
        .validate_payload(endpoint, &payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Reference(ReferenceError::Invalid { .. })
    ));
}

#[tokio::test]
async fn test_deleted_target_does_not_resolve() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let parent = backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();
    let payload = endpoint_payload(&parent.url());
    backend.delete(org, &parent).await.unwrap();

    let err = validator
        .validate_payload(endpoint, &payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Reference(ReferenceError::Unresolved { .. })
    ));
}

#[tokio::test]
async fn test_delete_blocked_while_referenced() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let endpoint = registry.get("Endpoint").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let parent = backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();
    let pointing = backend
        .create(endpoint, endpoint_payload(&parent.url()))
        .await
        .unwrap();

    let err = validator
        .guard_delete(org, parent.external_id())
        .await
        .unwrap_err();
    match err {
        RegistryError::Conflict(ConflictError::ReferencedBy { referencing, .. }) => {
            assert_eq!(referencing, pointing.url());
        }
        other => panic!("unexpected error: {}", other),
    }

    // Removing the referencing record unblocks the deletion.
    backend.delete(endpoint, &pointing).await.unwrap();
    validator
        .guard_delete(org, parent.external_id())
        .await
        .unwrap();
    backend.delete(org, &parent).await.unwrap();

    let tombstone = backend
        .get_version(org, parent.external_id(), 2)
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.is_deleted());
}

#[tokio::test]
async fn test_self_reference_does_not_block_deletion() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let mut payload = organization_payload("12345678", "Self Parent");
    payload["id"] = json!("org-self");
    payload["partOf"] = json!({"reference": "Organization/org-self"});
    let record = backend.create(org, payload).await.unwrap();

    validator
        .guard_delete(org, record.external_id())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_referencing_records_span_kinds() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let endpoint = registry.get("Endpoint").unwrap();
    let location = registry.get("Location").unwrap();
    let validator = ReferenceValidator::new(&backend, &registry);

    let parent = backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();
    backend
        .create(endpoint, endpoint_payload(&parent.url()))
        .await
        .unwrap();
    backend
        .create(
            location,
            json!({
                "name": "Main site",
                "managingOrganization": {"reference": parent.url()}
            }),
        )
        .await
        .unwrap();

    let referencing = validator
        .referencing_records(org, parent.external_id())
        .await
        .unwrap();
    let mut kinds: Vec<&str> = referencing.iter().map(|r| r.kind()).collect();
    kinds.sort_unstable();
    assert_eq!(kinds, vec!["Endpoint", "Location"]);
}
