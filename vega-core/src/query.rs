//! Product query filters
//!
//! A [`ProductQuery`] collects the column predicates, metadata
//! requirements, and supersession visibility applied to provenance
//! lookups. String predicates use SQL LIKE semantics, so `%` wildcards:
//! `data_subtype("%")` matches any non-null subtype, while leaving a
//! field unset skips the predicate entirely.

use serde::{Deserialize, Serialize};

/// Filter set for product lookups.
///
/// ```
/// use vega_core::query::ProductQuery;
///
/// // Headers of subtype WCS:
/// let q = ProductQuery::of_type("Header.WCS");
/// // Headers of any subtype, including none:
/// let q = ProductQuery::of_type("Header");
/// // Any product with a matching metadata pair:
/// let q = ProductQuery::new().metadata("FILTER", "r");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQuery {
    pub data_type: Option<String>,
    pub data_subtype: Option<String>,
    pub task_name: Option<String>,
    pub product_location: Option<String>,
    pub flags: Option<i64>,
    pub is_input: Option<bool>,
    pub producing_task_run_id: Option<i64>,
    /// Required metadata pairs. Every pair must match (logical AND).
    pub metadata: Vec<(String, String)>,
    /// Include products superseded within the queried run.
    pub use_superseded: bool,
}

impl ProductQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a query from a `type` or `type.subtype` string.
    pub fn of_type(full_type: &str) -> Self {
        let mut query = Self::default();
        match full_type.split_once('.') {
            Some((data_type, subtype)) => {
                query.data_type = Some(data_type.to_string());
                query.data_subtype = Some(subtype.to_string());
            }
            None => query.data_type = Some(full_type.to_string()),
        }
        query
    }

    pub fn data_type(mut self, pattern: &str) -> Self {
        self.data_type = Some(pattern.to_string());
        self
    }

    pub fn data_subtype(mut self, pattern: &str) -> Self {
        self.data_subtype = Some(pattern.to_string());
        self
    }

    pub fn task_name(mut self, pattern: &str) -> Self {
        self.task_name = Some(pattern.to_string());
        self
    }

    pub fn product_location(mut self, pattern: &str) -> Self {
        self.product_location = Some(pattern.to_string());
        self
    }

    pub fn flags(mut self, flags: i64) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn is_input(mut self, is_input: bool) -> Self {
        self.is_input = Some(is_input);
        self
    }

    pub fn producing_task_run(mut self, task_run_id: i64) -> Self {
        self.producing_task_run_id = Some(task_run_id);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    pub fn use_superseded(mut self, use_superseded: bool) -> Self {
        self.use_superseded = use_superseded;
        self
    }

    /// Merge predicates from `other` that this query has not set itself.
    /// Metadata requirements are concatenated.
    pub fn merged_with(mut self, other: &ProductQuery) -> Self {
        self.data_type = self.data_type.or_else(|| other.data_type.clone());
        self.data_subtype = self.data_subtype.or_else(|| other.data_subtype.clone());
        self.task_name = self.task_name.or_else(|| other.task_name.clone());
        self.product_location = self
            .product_location
            .or_else(|| other.product_location.clone());
        self.flags = self.flags.or(other.flags);
        self.is_input = self.is_input.or(other.is_input);
        self.producing_task_run_id = self.producing_task_run_id.or(other.producing_task_run_id);
        self.metadata.extend(other.metadata.iter().cloned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_type_splits_dotted_notation() {
        let q = ProductQuery::of_type("Header.WCS");
        assert_eq!(q.data_type.as_deref(), Some("Header"));
        assert_eq!(q.data_subtype.as_deref(), Some("WCS"));

        let q = ProductQuery::of_type("Header");
        assert_eq!(q.data_type.as_deref(), Some("Header"));
        assert!(q.data_subtype.is_none());
    }

    #[test]
    fn test_merged_with_prefers_own_predicates() {
        let base = ProductQuery::new().data_type("FitsImage").flags(2);
        let merged = ProductQuery::new()
            .data_type("Catalog")
            .metadata("FILTER", "r")
            .merged_with(&base);

        assert_eq!(merged.data_type.as_deref(), Some("Catalog"));
        assert_eq!(merged.flags, Some(2));
        assert_eq!(merged.metadata.len(), 1);
    }
}
