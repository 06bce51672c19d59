//! Resource-kind configuration.
//!
//! The store implements its operations once; everything kind-specific — the
//! kind name, the natural-key rule, and which payload fields hold references
//! to other records — lives in a [`KindDefinition`]. A [`KindRegistry`] holds
//! the definitions for one deployment and drives the reference validator's
//! reverse lookups.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{PayloadError, RegistryResult};

/// How a reference field is laid out in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A single object: `{"reference": "Kind/id"}`.
    One,
    /// An array of such objects.
    Many,
}

/// A payload field that holds references to other records.
#[derive(Debug, Clone)]
pub struct ReferenceField {
    /// Field name at the top level of the payload document.
    pub field: &'static str,
    /// Whether the field is a single reference or an array.
    pub cardinality: Cardinality,
    /// The kind the references must point to.
    pub target: &'static str,
}

impl ReferenceField {
    /// Declares a single-valued reference field.
    pub fn one(field: &'static str, target: &'static str) -> Self {
        Self {
            field,
            cardinality: Cardinality::One,
            target,
        }
    }

    /// Declares an array-valued reference field.
    pub fn many(field: &'static str, target: &'static str) -> Self {
        Self {
            field,
            cardinality: Cardinality::Many,
            target,
        }
    }

    /// Extracts the reference strings held by this field, if present.
    ///
    /// An absent field yields an empty list; a present field with the wrong
    /// shape is an error.
    pub fn extract(&self, kind: &str, payload: &Value) -> RegistryResult<Vec<String>> {
        let Some(value) = payload.get(self.field) else {
            return Ok(Vec::new());
        };
        if value.is_null() {
            return Ok(Vec::new());
        }

        let malformed = || PayloadError::MalformedReferenceField {
            kind: kind.to_string(),
            field: self.field.to_string(),
        };

        let mut references = Vec::new();
        match self.cardinality {
            Cardinality::One => {
                let reference = value
                    .get("reference")
                    .and_then(Value::as_str)
                    .ok_or_else(malformed)?;
                references.push(reference.to_string());
            }
            Cardinality::Many => {
                let entries = value.as_array().ok_or_else(malformed)?;
                for entry in entries {
                    let reference = entry
                        .get("reference")
                        .and_then(Value::as_str)
                        .ok_or_else(malformed)?;
                    references.push(reference.to_string());
                }
            }
        }
        Ok(references)
    }
}

/// Natural-key rule for a kind: the value of the payload identifier whose
/// system matches.
#[derive(Debug, Clone)]
pub struct NaturalKey {
    /// Identifier system that marks the natural key (substring match).
    pub system: &'static str,
}

/// Configuration of one resource kind.
#[derive(Debug, Clone)]
pub struct KindDefinition {
    name: &'static str,
    natural_key: Option<NaturalKey>,
    reference_fields: Vec<ReferenceField>,
}

impl KindDefinition {
    /// Creates a kind with no natural key and no reference fields.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            natural_key: None,
            reference_fields: Vec::new(),
        }
    }

    /// Sets the natural-key identifier system.
    pub fn with_natural_key(mut self, system: &'static str) -> Self {
        self.natural_key = Some(NaturalKey { system });
        self
    }

    /// Declares a reference field.
    pub fn with_reference(mut self, field: ReferenceField) -> Self {
        self.reference_fields.push(field);
        self
    }

    /// Returns the kind name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the declared reference fields.
    pub fn reference_fields(&self) -> &[ReferenceField] {
        &self.reference_fields
    }

    /// Returns the reference fields targeting the given kind.
    pub fn reference_fields_targeting(&self, target: &str) -> Vec<&ReferenceField> {
        self.reference_fields
            .iter()
            .filter(|f| f.target == target)
            .collect()
    }

    /// Extracts the natural key from a payload.
    ///
    /// Returns `Ok(None)` when the kind has no natural-key rule. When it has
    /// one, the payload must carry an `identifier` entry whose `system`
    /// contains the configured system.
    pub fn extract_natural_key(&self, payload: &Value) -> RegistryResult<Option<String>> {
        let Some(rule) = &self.natural_key else {
            return Ok(None);
        };

        let identifiers = payload
            .get("identifier")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for identifier in identifiers {
            let system = identifier.get("system").and_then(Value::as_str);
            let value = identifier.get("value").and_then(Value::as_str);
            if let (Some(system), Some(value)) = (system, value)
                && system.contains(rule.system)
            {
                return Ok(Some(value.to_string()));
            }
        }

        Err(PayloadError::MissingNaturalKey {
            kind: self.name.to_string(),
            system: rule.system.to_string(),
        }
        .into())
    }
}

/// The set of kinds known to one deployment, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindDefinition>,
}

impl KindRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kind definition, replacing any previous one with the same name.
    pub fn register(&mut self, kind: KindDefinition) {
        self.kinds.insert(kind.name(), kind);
    }

    /// Looks up a kind by name.
    pub fn get(&self, name: &str) -> Option<&KindDefinition> {
        self.kinds.get(name)
    }

    /// Iterates over all registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &KindDefinition> {
        self.kinds.values()
    }

    /// The provider-directory kind set.
    ///
    /// Organizations carry a natural key (the URA number identifier); the
    /// reference fields mirror how directory records point at each other.
    pub fn provider_directory() -> Self {
        let mut registry = Self::new();

        registry.register(
            KindDefinition::new("Organization")
                .with_natural_key("http://fhir.nl/fhir/NamingSystem/ura")
                .with_reference(ReferenceField::many("endpoint", "Endpoint"))
                .with_reference(ReferenceField::one("partOf", "Organization")),
        );
        registry.register(
            KindDefinition::new("Endpoint")
                .with_reference(ReferenceField::one("managingOrganization", "Organization")),
        );
        registry.register(KindDefinition::new("Practitioner"));
        registry.register(
            KindDefinition::new("PractitionerRole")
                .with_reference(ReferenceField::one("practitioner", "Practitioner"))
                .with_reference(ReferenceField::one("organization", "Organization"))
                .with_reference(ReferenceField::many("location", "Location"))
                .with_reference(ReferenceField::many("healthcareService", "HealthcareService"))
                .with_reference(ReferenceField::many("endpoint", "Endpoint")),
        );
        registry.register(
            KindDefinition::new("OrganizationAffiliation")
                .with_reference(ReferenceField::one("organization", "Organization"))
                .with_reference(ReferenceField::one(
                    "participatingOrganization",
                    "Organization",
                ))
                .with_reference(ReferenceField::many("endpoint", "Endpoint")),
        );
        registry.register(
            KindDefinition::new("HealthcareService")
                .with_reference(ReferenceField::one("providedBy", "Organization"))
                .with_reference(ReferenceField::many("location", "Location"))
                .with_reference(ReferenceField::many("endpoint", "Endpoint")),
        );
        registry.register(
            KindDefinition::new("Location")
                .with_reference(ReferenceField::one("managingOrganization", "Organization"))
                .with_reference(ReferenceField::one("partOf", "Location")),
        );

        registry
    }
}
