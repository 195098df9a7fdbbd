//! Pipeline and task run records

use serde::{Deserialize, Serialize};

/// Status code recorded for a task that completed normally.
pub const STATUS_SUCCESS: i32 = 0;

/// Reserved sentinel recorded for a task that crashed (raised instead of
/// returning a code). Tasks must not return this value themselves.
pub const STATUS_CRASHED: i32 = -1;

/// One execution of a pipeline.
///
/// Created when the run starts and finalized exactly once when the task
/// loop ends. Together with its [`TaskRun`]s and the products they emit,
/// this forms the permanent audit trail of what ran, when, and with what
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub pipeline_name: String,
    pub pipeline_version: String,
    pub start_time_utc: chrono::DateTime<chrono::Utc>,
    pub end_time_utc: Option<chrono::DateTime<chrono::Utc>>,
    /// None while the run is still open.
    pub success: Option<bool>,
    pub failed_tasks: Vec<String>,
    pub crashed_tasks: Vec<String>,
    /// JSON snapshot of the configuration the run started with.
    pub config: String,
    pub log_filepath: Option<String>,
}

impl std::fmt::Display for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' v{} (run #{})",
            self.pipeline_name, self.pipeline_version, self.id
        )
    }
}

/// One execution of a single task within a [`PipelineRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_name: String,
    pub start_time_utc: chrono::DateTime<chrono::Utc>,
    pub end_time_utc: Option<chrono::DateTime<chrono::Utc>>,
    /// 0 = success, [`STATUS_CRASHED`] = crash, anything else is a
    /// task-defined failure code. None while the task is still running.
    pub status_code: Option<i32>,
    pub pipeline_run_id: i64,
    /// Product group this task was bound to, if any.
    pub product_group_id: Option<i64>,
}

impl TaskRun {
    pub fn crashed(&self) -> bool {
        self.status_code == Some(STATUS_CRASHED)
    }

    pub fn succeeded(&self) -> bool {
        self.status_code == Some(STATUS_SUCCESS)
    }
}

impl std::fmt::Display for TaskRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' (task run #{})", self.task_name, self.id)
    }
}

/// Join a list of task names the way the run record stores them.
pub fn join_task_names(names: &[String]) -> String {
    names.join(",")
}

/// Split a stored task-name list back into names. Empty or missing
/// columns yield an empty list.
pub fn split_task_names(joined: Option<&str>) -> Vec<String> {
    match joined {
        None | Some("") => Vec::new(),
        Some(s) => s.split(',').map(str::to_string).collect(),
    }
}
