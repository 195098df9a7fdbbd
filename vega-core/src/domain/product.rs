//! Product domain types

use serde::{Deserialize, Serialize};

/// A tracked unit of data with a type, location, and provenance.
///
/// Products are the inputs and outputs of pipelines. Externally supplied
/// data (e.g. raw frames pulled off a telescope) is registered with
/// `is_input` set and task name `"INPUT"`; everything else is created by a
/// task during a run and points back at the run and task that produced it.
///
/// Rows are append-only: once recorded, a product is never deleted. New
/// edges (precursors, supersessors, metadata) may still be attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub data_type: String,
    pub data_subtype: Option<String>,
    /// Name of the task that created this product, or `"INPUT"`.
    pub task_name: String,
    /// Opaque locator (usually an absolute file path).
    pub product_location: String,
    pub creation_dt: chrono::DateTime<chrono::Utc>,
    pub is_input: bool,
    /// Task-defined flag bits. Interpretation is left to individual tasks.
    pub flags: Option<i64>,
    pub producing_pipeline_run_id: Option<i64>,
    pub producing_task_run_id: Option<i64>,
}

impl Product {
    /// Render the dotted `type` or `type.subtype` form used by task
    /// contracts and reports.
    pub fn full_type(&self) -> String {
        match &self.data_subtype {
            Some(sub) => format!("{}.{}", self.data_type, sub),
            None => self.data_type.clone(),
        }
    }

    /// The type strings this product satisfies during contract checks:
    /// the wildcard, its type, and its dotted type.subtype form.
    pub fn satisfied_types(&self) -> Vec<String> {
        let mut types = vec!["*".to_string(), self.data_type.clone()];
        if let Some(sub) = &self.data_subtype {
            types.push(format!("{}.{}", self.data_type, sub));
        }
        types
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}: {}Product of type '{}' at {}",
            self.id,
            if self.is_input { "Input " } else { "" },
            self.full_type(),
            self.product_location
        )
    }
}
