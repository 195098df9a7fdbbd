//! Product group types

use serde::{Deserialize, Serialize};

/// A named or anonymous cohort of products.
///
/// Groups scope a task's product lookups to a subset of the run's
/// products, e.g. one group per photometric filter so that a stacking
/// task only sees frames from its own band. Groups may nest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductGroup {
    pub id: i64,
    pub name: Option<String>,
    pub pipeline_run_id: Option<i64>,
    pub parent_group_id: Option<i64>,
}

/// How a grouped task's product lookup treats group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupPolicy {
    /// Only the group's products, even if that set is empty.
    Strict,
    /// The group's products if any exist, otherwise all related products.
    Priority,
    /// At most the single most-recently-produced matching group product.
    PreviousOnly,
    /// Bypass group scoping entirely.
    #[default]
    Ignore,
    /// All related products except those produced by tasks bound to a
    /// different group within the same run.
    AvoidOthers,
}

impl std::fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GroupPolicy::Strict => "strict",
            GroupPolicy::Priority => "priority",
            GroupPolicy::PreviousOnly => "previous_only",
            GroupPolicy::Ignore => "ignore",
            GroupPolicy::AvoidOthers => "avoid_others",
        };
        f.write_str(name)
    }
}
