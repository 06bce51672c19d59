//! Predicate builder for criteria-driven queries.
//!
//! Translates [`SearchCriteria`] into SQL over the `records` table, using
//! `json_extract`/`json_each` for predicates that reach into the payload
//! document. Criteria are conjoined with AND; only the any-of-reference-fields
//! criterion produces an internal, parenthesized OR.

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use serde_json::Value;

use crate::types::{Cardinality, Criterion, SearchCriteria};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::String(s) => s.to_sql(),
            SqlParam::Integer(i) => i.to_sql(),
            SqlParam::Float(f) => f.to_sql(),
        }
    }
}

impl SqlFragment {
    /// Creates a new fragment with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Appends another fragment with AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if other.sql.is_empty() {
            return self;
        }
        if self.sql.is_empty() {
            self.sql = other.sql;
        } else {
            self.sql = format!("{} AND {}", self.sql, other.sql);
        }
        self.params.extend(other.params);
        self
    }

    /// Combines with another fragment using OR, parenthesizing both sides.
    pub fn or(mut self, other: SqlFragment) -> Self {
        if other.sql.is_empty() {
            return self;
        }
        if self.sql.is_empty() {
            self.sql = other.sql;
        } else {
            self.sql = format!("({}) OR ({})", self.sql, other.sql);
        }
        self.params.extend(other.params);
        self
    }
}

/// The column list every record query selects, in `row_to_record` order.
pub const RECORD_COLUMNS: &str = "internal_id, resource_type, external_id, version, \
     latest, deleted, payload, envelope_meta, natural_key, created_at, modified_at";

/// Builds record queries from search criteria.
pub struct CriteriaBuilder<'a> {
    kind: &'a str,
}

impl<'a> CriteriaBuilder<'a> {
    /// Creates a builder for the given kind name.
    pub fn new(kind: &'a str) -> Self {
        Self { kind }
    }

    /// Builds the complete SELECT for the criteria.
    pub fn build(&self, criteria: &SearchCriteria) -> SqlFragment {
        let mut query = SqlFragment::with_params(
            format!(
                "SELECT {} FROM records WHERE resource_type = ?",
                RECORD_COLUMNS
            ),
            vec![SqlParam::String(self.kind.to_string())],
        );

        if criteria.latest_only() {
            query = query.and(SqlFragment::new("latest = 1 AND deleted = 0"));
        }

        for criterion in criteria.criteria() {
            query = query.and(Self::build_criterion(criterion));
        }

        if criteria.is_sorted_history() {
            query.sql.push_str(" ORDER BY modified_at DESC, version DESC");
        }

        query
    }

    fn build_criterion(criterion: &Criterion) -> SqlFragment {
        match criterion {
            Criterion::ExternalId(id) => SqlFragment::with_params(
                "external_id = ?",
                vec![SqlParam::String(id.clone())],
            ),
            Criterion::FieldEq { field, value } => Self::field_eq(field, value),
            Criterion::FieldContains { field, value } => SqlFragment::with_params(
                "json_extract(payload, ?) LIKE ? ESCAPE '\\'",
                vec![
                    SqlParam::String(json_path(field)),
                    SqlParam::String(format!("%{}%", escape_like(value))),
                ],
            ),
            Criterion::Active(active) => SqlFragment::with_params(
                "json_extract(payload, '$.active') = ?",
                vec![SqlParam::Integer(i64::from(*active))],
            ),
            Criterion::Identifier(value) => SqlFragment::with_params(
                "EXISTS (SELECT 1 FROM json_each(payload, '$.identifier') \
                 WHERE json_extract(json_each.value, '$.value') = ?)",
                vec![SqlParam::String(value.clone())],
            ),
            Criterion::Reference {
                field,
                cardinality,
                reference,
            } => Self::reference(field, *cardinality, reference),
            Criterion::AnyReference { fields, reference } => {
                // An empty disjunction is no filter, not "()".
                if fields.is_empty() {
                    return SqlFragment::new("");
                }
                let mut disjunction = SqlFragment::new("");
                for (field, cardinality) in fields {
                    disjunction =
                        disjunction.or(Self::reference(field, *cardinality, reference));
                }
                // Parenthesize before conjoining with the rest.
                SqlFragment::with_params(format!("({})", disjunction.sql), disjunction.params)
            }
            Criterion::Since(instant) => SqlFragment::with_params(
                // Tombstones have no payload; fall back to the row timestamp.
                "COALESCE(json_extract(payload, '$.meta.lastUpdated'), modified_at) >= ?",
                vec![SqlParam::String(instant.to_rfc3339())],
            ),
        }
    }

    fn field_eq(field: &str, value: &Value) -> SqlFragment {
        let param = match value {
            Value::Bool(b) => SqlParam::Integer(i64::from(*b)),
            Value::Number(n) if n.is_i64() => SqlParam::Integer(n.as_i64().unwrap_or_default()),
            Value::Number(n) => SqlParam::Float(n.as_f64().unwrap_or_default()),
            other => SqlParam::String(other.as_str().map_or_else(
                || other.to_string(),
                ToString::to_string,
            )),
        };
        SqlFragment::with_params(
            "json_extract(payload, ?) = ?",
            vec![SqlParam::String(json_path(field)), param],
        )
    }

    fn reference(field: &str, cardinality: Cardinality, reference: &str) -> SqlFragment {
        match cardinality {
            Cardinality::One => SqlFragment::with_params(
                "json_extract(payload, ?) = ?",
                vec![
                    SqlParam::String(format!("$.{}.reference", field)),
                    SqlParam::String(reference.to_string()),
                ],
            ),
            Cardinality::Many => SqlFragment::with_params(
                "EXISTS (SELECT 1 FROM json_each(payload, ?) \
                 WHERE json_extract(json_each.value, '$.reference') = ?)",
                vec![
                    SqlParam::String(json_path(field)),
                    SqlParam::String(reference.to_string()),
                ],
            ),
        }
    }
}

/// JSON path to a top-level payload field, bound as a parameter so field
/// names never splice into the statement text.
fn json_path(field: &str) -> String {
    format!("$.{}", field)
}

/// Escapes LIKE wildcards in a user-supplied substring.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
