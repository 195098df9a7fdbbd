//! Product metadata records

use serde::{Deserialize, Serialize};

/// A key/value annotation attached to one or more products.
///
/// A record remembers the product it was first written for and the task
/// that wrote it; lineage propagation attaches the same record to derived
/// products rather than copying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: i64,
    /// Product this record was originally created for.
    pub product_id: i64,
    /// Task run that wrote the record, if written during a run.
    pub task_run_id: Option<i64>,
    pub key: String,
    pub value: String,
}

impl std::fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Metadata[{}={}]", self.key, self.value)
    }
}
