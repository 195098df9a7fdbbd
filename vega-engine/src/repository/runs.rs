//! Pipeline run and task run repository

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use vega_core::domain::run::{PipelineRun, TaskRun, join_task_names, split_task_names};
use vega_core::time::{from_stamp, to_stamp};

/// Open a new pipeline run record. End time, success, and task lists
/// stay null until the run is finalized.
pub async fn create_pipeline_run(
    pool: &SqlitePool,
    pipeline_name: &str,
    pipeline_version: &str,
    start: DateTime<Utc>,
    config_json: &str,
    log_filepath: Option<&str>,
) -> Result<PipelineRun, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO pipeline_runs (pipeline_name, pipeline_version, start_time_utc, config, log_filepath)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(pipeline_name)
    .bind(pipeline_version)
    .bind(to_stamp(start))
    .bind(config_json)
    .bind(log_filepath)
    .execute(pool)
    .await?;

    Ok(PipelineRun {
        id: result.last_insert_rowid(),
        pipeline_name: pipeline_name.to_string(),
        pipeline_version: pipeline_version.to_string(),
        start_time_utc: start,
        end_time_utc: None,
        success: None,
        failed_tasks: Vec::new(),
        crashed_tasks: Vec::new(),
        config: config_json.to_string(),
        log_filepath: log_filepath.map(str::to_string),
    })
}

/// Finalize a pipeline run. Called exactly once, after the task loop ends.
pub async fn finalize_pipeline_run(
    pool: &SqlitePool,
    run_id: i64,
    end: DateTime<Utc>,
    success: bool,
    failed: &[String],
    crashed: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET end_time_utc = ?1, success = ?2, failed_tasks = ?3, crashed_tasks = ?4
        WHERE id = ?5
        "#,
    )
    .bind(to_stamp(end))
    .bind(success)
    .bind(join_task_names(failed))
    .bind(join_task_names(crashed))
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a pipeline run by ID
pub async fn find_pipeline_run(
    pool: &SqlitePool,
    run_id: i64,
) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRunRow>(
        r#"
        SELECT id, pipeline_name, pipeline_version, start_time_utc, end_time_utc,
               success, failed_tasks, crashed_tasks, config, log_filepath
        FROM pipeline_runs
        WHERE id = ?1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(PipelineRunRow::into_run))
}

/// Open a new task run record within a pipeline run.
pub async fn create_task_run(
    pool: &SqlitePool,
    task_name: &str,
    start: DateTime<Utc>,
    pipeline_run_id: i64,
    product_group_id: Option<i64>,
) -> Result<TaskRun, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO task_runs (task_name, start_time_utc, pipeline_run_id, product_group_id)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(task_name)
    .bind(to_stamp(start))
    .bind(pipeline_run_id)
    .bind(product_group_id)
    .execute(pool)
    .await?;

    Ok(TaskRun {
        id: result.last_insert_rowid(),
        task_name: task_name.to_string(),
        start_time_utc: start,
        end_time_utc: None,
        status_code: None,
        pipeline_run_id,
        product_group_id,
    })
}

/// Record a task run's end time and status code.
pub async fn finalize_task_run(
    pool: &SqlitePool,
    task_run_id: i64,
    end: DateTime<Utc>,
    status_code: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE task_runs SET end_time_utc = ?1, status_code = ?2 WHERE id = ?3")
        .bind(to_stamp(end))
        .bind(status_code)
        .bind(task_run_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Find a task run by ID
pub async fn find_task_run(
    pool: &SqlitePool,
    task_run_id: i64,
) -> Result<Option<TaskRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRunRow>(
        r#"
        SELECT id, task_name, start_time_utc, end_time_utc, status_code,
               pipeline_run_id, product_group_id
        FROM task_runs
        WHERE id = ?1
        "#,
    )
    .bind(task_run_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(TaskRunRow::into_task_run))
}

/// List a run's task runs in execution order.
pub async fn task_runs_for(
    pool: &SqlitePool,
    pipeline_run_id: i64,
) -> Result<Vec<TaskRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRunRow>(
        r#"
        SELECT id, task_name, start_time_utc, end_time_utc, status_code,
               pipeline_run_id, product_group_id
        FROM task_runs
        WHERE pipeline_run_id = ?1
        ORDER BY id ASC
        "#,
    )
    .bind(pipeline_run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(TaskRunRow::into_task_run).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRunRow {
    id: i64,
    pipeline_name: String,
    pipeline_version: String,
    start_time_utc: String,
    end_time_utc: Option<String>,
    success: Option<bool>,
    failed_tasks: Option<String>,
    crashed_tasks: Option<String>,
    config: String,
    log_filepath: Option<String>,
}

impl PipelineRunRow {
    fn into_run(self) -> PipelineRun {
        PipelineRun {
            id: self.id,
            pipeline_name: self.pipeline_name,
            pipeline_version: self.pipeline_version,
            start_time_utc: from_stamp(&self.start_time_utc).unwrap_or_default(),
            end_time_utc: self.end_time_utc.as_deref().and_then(|s| from_stamp(s).ok()),
            success: self.success,
            failed_tasks: split_task_names(self.failed_tasks.as_deref()),
            crashed_tasks: split_task_names(self.crashed_tasks.as_deref()),
            config: self.config,
            log_filepath: self.log_filepath,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRunRow {
    id: i64,
    task_name: String,
    start_time_utc: String,
    end_time_utc: Option<String>,
    status_code: Option<i32>,
    pipeline_run_id: i64,
    product_group_id: Option<i64>,
}

impl TaskRunRow {
    fn into_task_run(self) -> TaskRun {
        TaskRun {
            id: self.id,
            task_name: self.task_name,
            start_time_utc: from_stamp(&self.start_time_utc).unwrap_or_default(),
            end_time_utc: self.end_time_utc.as_deref().and_then(|s| from_stamp(s).ok()),
            status_code: self.status_code,
            pipeline_run_id: self.pipeline_run_id,
            product_group_id: self.product_group_id,
        }
    }
}
