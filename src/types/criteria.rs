//! Search criteria for `find` operations.
//!
//! [`SearchCriteria`] is the input model of the predicate builder: a set of
//! named criteria conjoined with AND, plus the view selectors `latest_only`
//! (default) and `sort_history`. Builder methods take `Option`s and silently
//! drop `None` — absence means "no filter", never "filter on null"; callers
//! needing to match absence use an explicit criterion.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::kind::{Cardinality, ReferenceField};

/// A single search criterion.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Scalar equality on the external id column.
    ExternalId(String),

    /// Exact match on a top-level payload field.
    FieldEq {
        /// Payload field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },

    /// Case-insensitive substring match on a free-text payload field.
    FieldContains {
        /// Payload field name.
        field: String,
        /// Substring to look for.
        value: String,
    },

    /// Equality on the payload's `active` flag.
    Active(bool),

    /// Containment match on the payload's identifier array: any entry whose
    /// `value` equals the given string.
    Identifier(String),

    /// Containment match on a reference field: the field holds an entry whose
    /// `reference` equals the given string.
    Reference {
        /// Payload field name.
        field: String,
        /// Whether the field is a single reference or an array.
        cardinality: Cardinality,
        /// Full reference string ("Kind/external-id").
        reference: String,
    },

    /// Disjunction over several reference fields: any of them contains the
    /// given reference. Parenthesized before being conjoined with the rest.
    AnyReference {
        /// (field name, cardinality) pairs to probe.
        fields: Vec<(String, Cardinality)>,
        /// Full reference string.
        reference: String,
    },

    /// The payload audit timestamp is at or after the given instant.
    /// Tombstones, which have no payload, are compared on the row timestamp.
    Since(DateTime<Utc>),
}

/// A set of criteria plus view selectors.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    criteria: Vec<Criterion>,
    latest_only: bool,
    sort_history: bool,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchCriteria {
    /// Creates empty criteria restricted to the current view
    /// (latest, non-deleted rows).
    pub fn new() -> Self {
        Self {
            criteria: Vec::new(),
            latest_only: true,
            sort_history: false,
        }
    }

    /// Lifts the current-view restriction: all versions, tombstones included.
    pub fn all_versions(mut self) -> Self {
        self.latest_only = false;
        self
    }

    /// Orders results newest-first by modification time, ties broken by
    /// version descending (oldest version sorts last).
    pub fn sorted_history(mut self) -> Self {
        self.sort_history = true;
        self
    }

    /// The full-history view: all versions, newest first.
    pub fn history() -> Self {
        Self::new().all_versions().sorted_history()
    }

    /// Returns whether results are restricted to latest, non-deleted rows.
    pub fn latest_only(&self) -> bool {
        self.latest_only
    }

    /// Returns whether results are ordered newest-first.
    pub fn is_sorted_history(&self) -> bool {
        self.sort_history
    }

    /// Returns the criteria list.
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Adds a criterion unconditionally.
    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Filters on the external id.
    pub fn external_id<V: Into<String>>(mut self, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::ExternalId(value.into()));
        }
        self
    }

    /// Exact match on a top-level payload field.
    pub fn field_eq<V: Into<Value>>(mut self, field: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::FieldEq {
                field: field.to_string(),
                value: value.into(),
            });
        }
        self
    }

    /// Case-insensitive substring match on a free-text payload field.
    pub fn field_contains<V: Into<String>>(mut self, field: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::FieldContains {
                field: field.to_string(),
                value: value.into(),
            });
        }
        self
    }

    /// Filters on the payload's `active` flag.
    pub fn active(mut self, value: Option<bool>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::Active(value));
        }
        self
    }

    /// Containment match on the payload identifier array.
    pub fn identifier<V: Into<String>>(mut self, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::Identifier(value.into()));
        }
        self
    }

    /// Containment match on a declared reference field.
    pub fn reference<V: Into<String>>(mut self, field: &ReferenceField, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::Reference {
                field: field.field.to_string(),
                cardinality: field.cardinality,
                reference: value.into(),
            });
        }
        self
    }

    /// Disjunctive containment over several reference fields.
    ///
    /// No fields means no filter; the criterion is dropped like a `None`.
    pub fn any_reference(mut self, fields: &[&ReferenceField], reference: &str) -> Self {
        if fields.is_empty() {
            return self;
        }
        self.criteria.push(Criterion::AnyReference {
            fields: fields
                .iter()
                .map(|f| (f.field.to_string(), f.cardinality))
                .collect(),
            reference: reference.to_string(),
        });
        self
    }

    /// Restricts to versions modified at or after the given instant.
    pub fn since(mut self, value: Option<DateTime<Utc>>) -> Self {
        if let Some(value) = value {
            self.criteria.push(Criterion::Since(value));
        }
        self
    }
}
