//! Search results and metadata filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChunkId, Metadata};

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matched chunk.
    pub chunk_id: ChunkId,
    /// Source text, if stored.
    pub content: Option<String>,
    /// Score in the collection metric's convention.
    pub score: f32,
    /// Stored metadata.
    pub metadata: Metadata,
}

/// One predicate over a metadata field.
///
/// Field names may use dots to reach into nested objects (`"source.kind"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterCondition {
    /// Field equals value.
    Eq {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Numeric field within bounds.
    Range {
        /// Field name.
        field: String,
        /// Exclusive lower bound.
        gt: Option<f64>,
        /// Inclusive lower bound.
        gte: Option<f64>,
        /// Exclusive upper bound.
        lt: Option<f64>,
        /// Inclusive upper bound.
        lte: Option<f64>,
    },
    /// Field equals one of the values.
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
}

impl FilterCondition {
    /// Returns the field this condition tests.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::Range { field, .. } | Self::In { field, .. } => field,
        }
    }

    /// Evaluates the condition against record metadata.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = lookup(metadata, self.field()) else {
            return false;
        };
        match self {
            Self::Eq { value, .. } => values_equal(actual, value),
            Self::In { values, .. } => values.iter().any(|v| values_equal(actual, v)),
            Self::Range {
                gt, gte, lt, lte, ..
            } => {
                let Some(x) = actual.as_f64() else {
                    return false;
                };
                gt.is_none_or(|b| x > b)
                    && gte.is_none_or(|b| x >= b)
                    && lt.is_none_or(|b| x < b)
                    && lte.is_none_or(|b| x <= b)
            },
        }
    }
}

/// Conjunctive metadata predicate: every condition must hold.
///
/// Backends that cannot push a filter into their engine apply
/// [`MetadataFilter::matches`] to candidates before the `top_k` cut.
///
/// # Example
///
/// ```rust
/// use vectorbridge::MetadataFilter;
///
/// let filter = MetadataFilter::new()
///     .eq("lang", "en")
///     .range("year", Some(2020.0), None)
///     .one_of("kind", vec!["doc".into(), "faq".into()]);
/// assert_eq!(filter.conditions.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// All conditions (AND logic).
    pub conditions: Vec<FilterCondition>,
}

impl MetadataFilter {
    /// Creates an empty filter (matches all).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FilterCondition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds an inclusive numeric range condition.
    #[must_use]
    pub fn range(mut self, field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.conditions.push(FilterCondition::Range {
            field: field.into(),
            gt: None,
            gte,
            lt: None,
            lte,
        });
        self
    }

    /// Adds a membership condition.
    #[must_use]
    pub fn one_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push(FilterCondition::In {
            field: field.into(),
            values,
        });
        self
    }

    /// Builds a filter of equality conditions from a metadata map.
    #[must_use]
    pub fn from_equalities(pairs: &Metadata) -> Self {
        pairs
            .iter()
            .fold(Self::new(), |f, (k, v)| f.eq(k.clone(), v.clone()))
    }

    /// Returns true if the filter is empty (matches all).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates every condition against record metadata.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|c| c.matches(metadata))
    }
}

/// Resolves a possibly dotted field path.
fn lookup<'a>(metadata: &'a Metadata, field: &str) -> Option<&'a Value> {
    if let Some(v) = metadata.get(field) {
        return Some(v);
    }
    let mut parts = field.split('.');
    let mut current = metadata.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Compares values, treating `1` and `1.0` as equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = MetadataFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&Metadata::new()));
    }

    #[test]
    fn test_eq_condition() {
        let meta = metadata(json!({"lang": "en", "page": 3}));
        assert!(MetadataFilter::new().eq("lang", "en").matches(&meta));
        assert!(!MetadataFilter::new().eq("lang", "de").matches(&meta));
        assert!(MetadataFilter::new().eq("page", 3.0).matches(&meta));
        assert!(!MetadataFilter::new().eq("missing", "x").matches(&meta));
    }

    #[test]
    fn test_range_condition() {
        let meta = metadata(json!({"year": 2021}));
        assert!(
            MetadataFilter::new()
                .range("year", Some(2020.0), Some(2021.0))
                .matches(&meta)
        );
        assert!(
            !MetadataFilter::new()
                .range("year", Some(2022.0), None)
                .matches(&meta)
        );

        let exclusive = MetadataFilter {
            conditions: vec![FilterCondition::Range {
                field: "year".to_string(),
                gt: Some(2021.0),
                gte: None,
                lt: None,
                lte: None,
            }],
        };
        assert!(!exclusive.matches(&meta));
    }

    #[test]
    fn test_range_on_non_numeric_fails() {
        let meta = metadata(json!({"year": "recent"}));
        assert!(
            !MetadataFilter::new()
                .range("year", Some(0.0), None)
                .matches(&meta)
        );
    }

    #[test]
    fn test_in_condition() {
        let meta = metadata(json!({"kind": "faq"}));
        let filter = MetadataFilter::new().one_of("kind", vec![json!("doc"), json!("faq")]);
        assert!(filter.matches(&meta));
        let filter = MetadataFilter::new().one_of("kind", vec![json!("doc")]);
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let meta = metadata(json!({"lang": "en", "year": 2019}));
        let filter = MetadataFilter::new()
            .eq("lang", "en")
            .range("year", Some(2020.0), None);
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn test_nested_field_lookup() {
        let meta = metadata(json!({"source": {"kind": "web"}}));
        assert!(MetadataFilter::new().eq("source.kind", "web").matches(&meta));
    }

    #[test]
    fn test_from_equalities() {
        let pairs = metadata(json!({"a": 1, "b": "x"}));
        let filter = MetadataFilter::from_equalities(&pairs);
        assert_eq!(filter.conditions.len(), 2);
        assert!(filter.matches(&pairs));
    }

    #[test]
    fn test_filter_serde_shape() {
        let filter = MetadataFilter::new().eq("lang", "en");
        let json = serde_json::to_value(&filter).expect("serialize failed");
        assert_eq!(
            json,
            json!({"conditions": [{"op": "eq", "field": "lang", "value": "en"}]})
        );
    }
}
