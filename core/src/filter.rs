//! Declarative audience filters: validation, canonical ordering, and
//! fingerprinting.
//!
//! A filter definition arrives as an array of `{field, operator, value}`
//! objects. Validation normalizes it into a [`ClauseList`]: an ordered list
//! of typed, immutable clauses. The canonical ordering makes the derived
//! [`ClauseList::fingerprint`] a change-detection hash — two definitions
//! with the same clauses in any order produce the same fingerprint, in any
//! process.
//!
//! # Field namespaces
//!
//! Fields are namespaced with one of two fixed prefixes mapped to the two
//! entity families joined at query time:
//!
//! - `contacts.` — the contact family (e.g. `contacts.email`)
//! - `companies.` — the company family (e.g. `companies.industry`)
//!
//! # Null policy
//!
//! A missing or JSON-null field value never satisfies `eq`, `in`, `gte` or
//! `lte`. For `not_in` the clause is set exclusion over *known* values: a
//! row whose field is missing or null is retained, never silently excluded.
//! This is deliberate and differs from SQL `NOT IN` null propagation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors produced while validating a filter definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The definition contained no clauses.
    #[error("Filter definition must contain at least one clause")]
    EmptyDefinition,

    /// The field does not start with an allow-listed namespace prefix.
    #[error("Unknown field namespace: {field}")]
    UnknownNamespace {
        /// The offending field path as supplied.
        field: String,
    },

    /// The operator string is not one of the supported operators.
    #[error("Unsupported operator: {operator}")]
    UnsupportedOperator {
        /// The offending operator as supplied.
        operator: String,
    },

    /// `in` / `not_in` was given a value that is not an array.
    #[error("Operator {operator} on {field} requires an array value")]
    ArrayRequired {
        /// Field the clause applies to.
        field: String,
        /// The offending operator.
        operator: String,
    },

    /// `in` / `not_in` was given an empty array.
    #[error("Operator {operator} on {field} requires a non-empty array")]
    EmptyArray {
        /// Field the clause applies to.
        field: String,
        /// The offending operator.
        operator: String,
    },

    /// `gte` / `lte` was given a non-numeric value.
    #[error("Operator {operator} on {field} requires a numeric value")]
    NumericRequired {
        /// Field the clause applies to.
        field: String,
        /// The offending operator.
        operator: String,
    },
}

impl FilterError {
    /// Stable error code for callers that dispatch on codes rather than
    /// display strings.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyDefinition => "ERR_FILTER_EMPTY",
            Self::UnknownNamespace { .. } => "ERR_FILTER_NAMESPACE",
            Self::UnsupportedOperator { .. } => "ERR_FILTER_OPERATOR",
            Self::ArrayRequired { .. } | Self::EmptyArray { .. } => "ERR_FILTER_ARRAY",
            Self::NumericRequired { .. } => "ERR_FILTER_NUMERIC",
        }
    }
}

/// The closed set of filter operators.
///
/// Query builders compile this tagged union into parameterized predicates;
/// there is deliberately no free-form operator escape hatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Exact equality against a scalar.
    Eq,
    /// Membership in a non-empty array.
    In,
    /// Set exclusion over a non-empty array (see module null policy).
    NotIn,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-or-equal.
    Lte,
}

impl Operator {
    /// Wire representation of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }

    /// Parse an operator from its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnsupportedOperator`] for anything outside the
    /// closed set.
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        match s {
            "eq" => Ok(Self::Eq),
            "in" => Ok(Self::In),
            "not_in" => Ok(Self::NotIn),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            other => Err(FilterError::UnsupportedOperator {
                operator: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two entity families a field can belong to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// The contact family (`contacts.` prefix).
    Contacts,
    /// The company family (`companies.` prefix).
    Companies,
}

impl Namespace {
    /// The namespace prefix including the trailing dot.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Contacts => "contacts.",
            Self::Companies => "companies.",
        }
    }
}

/// A validated, namespaced field path such as `contacts.email`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    path: String,
    namespace: Namespace,
}

impl FieldPath {
    /// Parse and validate a field path.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnknownNamespace`] when the path does not
    /// start with an allow-listed prefix.
    pub fn parse(path: &str) -> Result<Self, FilterError> {
        let namespace = if path.starts_with(Namespace::Contacts.prefix()) {
            Namespace::Contacts
        } else if path.starts_with(Namespace::Companies.prefix()) {
            Namespace::Companies
        } else {
            return Err(FilterError::UnknownNamespace {
                field: path.to_string(),
            });
        };

        if path.len() == namespace.prefix().len() {
            // Prefix with nothing after the dot.
            return Err(FilterError::UnknownNamespace {
                field: path.to_string(),
            });
        }

        Ok(Self {
            path: path.to_string(),
            namespace,
        })
    }

    /// The full path, prefix included.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Which entity family this field belongs to.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// The field name with the namespace prefix stripped.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.path[self.namespace.prefix().len()..]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.path
    }
}

/// One raw clause as it arrives from the outside, prior to validation.
#[derive(Clone, Debug, Deserialize)]
pub struct ClauseInput {
    /// Namespaced field path, e.g. `contacts.email`.
    pub field: String,
    /// Operator in wire form, e.g. `not_in`.
    pub operator: String,
    /// Scalar or array operand.
    #[serde(default)]
    pub value: serde_json::Value,
}

impl ClauseInput {
    /// Convenience constructor for building definitions in code.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// One validated, immutable filter condition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterClause {
    field: FieldPath,
    operator: Operator,
    value: serde_json::Value,
}

impl FilterClause {
    /// The field this clause constrains.
    #[must_use]
    pub const fn field(&self) -> &FieldPath {
        &self.field
    }

    /// The clause operator.
    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    /// The clause operand.
    #[must_use]
    pub const fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Evaluate this clause against one candidate row.
    ///
    /// `contact` and `company` hold the two joined entity families' fields;
    /// the clause reads from whichever its namespace selects. This is the
    /// reference predicate semantics; SQL builders must agree with it,
    /// including the null policy documented at module level.
    #[must_use]
    pub fn matches(
        &self,
        contact: &serde_json::Map<String, serde_json::Value>,
        company: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let fields = match self.field.namespace() {
            Namespace::Contacts => contact,
            Namespace::Companies => company,
        };
        // Null and missing are treated identically throughout.
        let current = fields.get(self.field.column()).filter(|v| !v.is_null());

        match self.operator {
            Operator::Eq => current.is_some_and(|v| values_equal(v, &self.value)),
            Operator::In => current.is_some_and(|v| array_contains(&self.value, v)),
            // Set exclusion: unknown values are retained, not excluded.
            Operator::NotIn => current.is_none_or(|v| !array_contains(&self.value, v)),
            Operator::Gte => numeric_cmp(current, &self.value, |actual, bound| actual >= bound),
            Operator::Lte => numeric_cmp(current, &self.value, |actual, bound| actual <= bound),
        }
    }

    fn canonical_value(&self) -> String {
        // serde_json (without the `preserve_order` feature) stores objects
        // as sorted maps, so `to_string` is a canonical encoding.
        self.value.to_string()
    }
}

fn values_equal(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        // Numeric comparison bridges integer/float representations (3 vs 3.0).
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => actual == expected,
    }
}

fn array_contains(haystack: &serde_json::Value, needle: &serde_json::Value) -> bool {
    haystack
        .as_array()
        .is_some_and(|candidates| candidates.iter().any(|c| values_equal(needle, c)))
}

fn numeric_cmp(
    current: Option<&serde_json::Value>,
    bound: &serde_json::Value,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (current.and_then(serde_json::Value::as_f64), bound.as_f64()) {
        (Some(actual), Some(bound)) => cmp(actual, bound),
        _ => false,
    }
}

/// An ordered, canonicalized list of validated clauses.
///
/// Construction goes through [`ClauseList::validate`] only; a `ClauseList`
/// in hand is guaranteed non-empty, type-checked, and canonically ordered.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClauseList(Vec<FilterClause>);

impl ClauseList {
    /// Validate and normalize a raw filter definition.
    ///
    /// Validation is pure: no I/O, no clocks, and the same input always
    /// yields the same ordered output. Clauses are sorted by
    /// `(field, operator, canonical value)` so that input ordering cannot
    /// influence the [fingerprint](Self::fingerprint).
    ///
    /// # Errors
    ///
    /// - [`FilterError::EmptyDefinition`] for an empty definition
    /// - [`FilterError::UnknownNamespace`] for a field outside `contacts.` /
    ///   `companies.`
    /// - [`FilterError::UnsupportedOperator`] for an operator outside the
    ///   closed set
    /// - [`FilterError::ArrayRequired`] / [`FilterError::EmptyArray`] for
    ///   malformed `in` / `not_in` operands
    /// - [`FilterError::NumericRequired`] for non-numeric `gte` / `lte`
    ///   operands
    pub fn validate(definition: &[ClauseInput]) -> Result<Self, FilterError> {
        if definition.is_empty() {
            return Err(FilterError::EmptyDefinition);
        }

        let mut clauses = Vec::with_capacity(definition.len());
        for input in definition {
            let field = FieldPath::parse(&input.field)?;
            let operator = Operator::parse(&input.operator)?;

            match operator {
                Operator::In | Operator::NotIn => match input.value.as_array() {
                    None => {
                        return Err(FilterError::ArrayRequired {
                            field: input.field.clone(),
                            operator: operator.as_str().to_string(),
                        });
                    }
                    Some(values) if values.is_empty() => {
                        return Err(FilterError::EmptyArray {
                            field: input.field.clone(),
                            operator: operator.as_str().to_string(),
                        });
                    }
                    Some(_) => {}
                },
                Operator::Gte | Operator::Lte => {
                    if !input.value.is_number() {
                        return Err(FilterError::NumericRequired {
                            field: input.field.clone(),
                            operator: operator.as_str().to_string(),
                        });
                    }
                }
                Operator::Eq => {}
            }

            clauses.push(FilterClause {
                field,
                operator,
                value: input.value.clone(),
            });
        }

        clauses.sort_by(|a, b| {
            (a.field.as_str(), a.operator.as_str(), a.canonical_value()).cmp(&(
                b.field.as_str(),
                b.operator.as_str(),
                b.canonical_value(),
            ))
        });

        Ok(Self(clauses))
    }

    /// The validated clauses in canonical order.
    #[must_use]
    pub fn clauses(&self) -> &[FilterClause] {
        &self.0
    }

    /// Number of clauses (always at least 1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API completeness alongside [`len`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Semantic fingerprint of this clause list.
    ///
    /// SHA-256 over the canonical clause encoding, hex-encoded. Stable
    /// across processes and independent of the definition's input order,
    /// so it doubles as a change-detection hash: a segment whose
    /// fingerprint is unchanged selects by the same filter.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for clause in &self.0 {
            hasher.update(clause.field.as_str().as_bytes());
            hasher.update([0x1f]);
            hasher.update(clause.operator.as_str().as_bytes());
            hasher.update([0x1f]);
            hasher.update(clause.canonical_value().as_bytes());
            hasher.update([0x1e]);
        }
        hex::encode(hasher.finalize())
    }

    /// Evaluate every clause against one candidate row (conjunction).
    #[must_use]
    pub fn matches(
        &self,
        contact: &serde_json::Map<String, serde_json::Value>,
        company: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.0.iter().all(|clause| clause.matches(contact, company))
    }
}
