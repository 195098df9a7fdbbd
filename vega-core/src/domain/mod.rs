//! Domain types shared across the Vega workspace

pub mod group;
pub mod metadata;
pub mod product;
pub mod run;

pub use group::{GroupPolicy, ProductGroup};
pub use metadata::MetadataRecord;
pub use product::Product;
pub use run::{PipelineRun, STATUS_CRASHED, STATUS_SUCCESS, TaskRun};
