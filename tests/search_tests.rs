//! Criteria-driven search over the current view.

mod common;

use common::{endpoint_payload, organization_payload, test_backend, test_registry};
use provider_registry::{RecordStorage, ReferenceField, SearchCriteria};
use serde_json::json;

#[tokio::test]
async fn test_find_by_external_id() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    let created = backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();
    backend
        .create(org, organization_payload("87654321", "Other Clinic"))
        .await
        .unwrap();

    let criteria = SearchCriteria::new().external_id(Some(created.external_id()));
    let hits = backend.find(org, &criteria).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].external_id(), created.external_id());
}

#[tokio::test]
async fn test_find_by_active_flag() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    backend
        .create(org, organization_payload("11111111", "Active Clinic"))
        .await
        .unwrap();
    let mut inactive = organization_payload("22222222", "Closed Clinic");
    inactive["active"] = json!(false);
    backend.create(org, inactive).await.unwrap();

    let hits = backend
        .find(org, &SearchCriteria::new().active(Some(true)))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload().unwrap()["name"], "Active Clinic");
}

#[tokio::test]
async fn test_find_by_name_substring() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    backend
        .create(org, organization_payload("11111111", "Meadow General Hospital"))
        .await
        .unwrap();
    backend
        .create(org, organization_payload("22222222", "River Clinic"))
        .await
        .unwrap();

    let hits = backend
        .find(org, &SearchCriteria::new().field_contains("name", Some("General")))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].natural_key(), Some("11111111"));
}

#[tokio::test]
async fn test_find_by_identifier_value() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    backend
        .create(org, organization_payload("12345678", "Example Clinic"))
        .await
        .unwrap();
    backend
        .create(org, organization_payload("87654321", "Other Clinic"))
        .await
        .unwrap();

    let hits = backend
        .find(org, &SearchCriteria::new().identifier(Some("12345678")))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload().unwrap()["name"], "Example Clinic");
}

#[tokio::test]
async fn test_find_by_reference() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();
    let endpoint = registry.get("Endpoint").unwrap();

    let parent = backend
        .create(org, organization_payload("12345678", "Parent Org"))
        .await
        .unwrap();
    let reference = parent.url();

    backend
        .create(endpoint, endpoint_payload(&reference))
        .await
        .unwrap();
    backend
        .create(endpoint, endpoint_payload("Organization/elsewhere"))
        .await
        .unwrap();

    let field = ReferenceField::one("managingOrganization", "Organization");
    let hits = backend
        .find(
            endpoint,
            &SearchCriteria::new().reference(&field, Some(reference.as_str())),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].payload().unwrap()["managingOrganization"]["reference"],
        reference
    );
}

#[tokio::test]
async fn test_none_criteria_do_not_filter() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    backend
        .create(org, organization_payload("11111111", "One"))
        .await
        .unwrap();
    backend
        .create(org, organization_payload("22222222", "Two"))
        .await
        .unwrap();

    let criteria = SearchCriteria::new()
        .active(None)
        .field_contains("name", None::<String>)
        .external_id(None::<String>);
    let hits = backend.find(org, &criteria).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_current_view_excludes_tombstones_and_old_versions() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    let kept = backend
        .create(org, organization_payload("11111111", "Kept"))
        .await
        .unwrap();
    let kept = backend
        .update(org, &kept, organization_payload("11111111", "Kept Renamed"))
        .await
        .unwrap();

    let removed = backend
        .create(org, organization_payload("22222222", "Removed"))
        .await
        .unwrap();
    backend.delete(org, &removed).await.unwrap();

    let hits = backend.find(org, &SearchCriteria::new()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].external_id(), kept.external_id());
    assert_eq!(hits[0].version(), 2);
}

#[tokio::test]
async fn test_since_filters_on_modification_time() {
    let backend = test_backend();
    let registry = test_registry();
    let org = registry.get("Organization").unwrap();

    backend
        .create(org, organization_payload("11111111", "Old"))
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let cutoff = chrono::Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(10));
    backend
        .create(org, organization_payload("22222222", "New"))
        .await
        .unwrap();

    let hits = backend
        .find(org, &SearchCriteria::new().since(Some(cutoff)))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload().unwrap()["name"], "New");
}
