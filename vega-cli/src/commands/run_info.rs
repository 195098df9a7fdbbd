//! Run report command
//!
//! Formats a past pipeline run: task table with durations and statuses,
//! input/output type and provenance tallies, and the recorded config
//! snapshot.

use anyhow::Result;
use colored::*;
use vega_core::domain::product::Product;
use vega_core::domain::run::{PipelineRun, STATUS_CRASHED, STATUS_SUCCESS, TaskRun};
use vega_core::query::ProductQuery;
use vega_core::time::to_stamp;
use vega_engine::{PipelineStore, provenance};

use super::{fmt_duration, tally};

pub async fn handle_run_info(db_path: &str, run_id: i64) -> Result<()> {
    let store = PipelineStore::open(db_path).await?;
    let report = run_info(&store, run_id).await?;
    println!("{report}");
    Ok(())
}

/// Build the full run report.
pub async fn run_info(store: &PipelineStore, run_id: i64) -> Result<String> {
    let run = store.pipeline_run(run_id).await?;
    let task_runs = store.task_runs_for(run_id).await?;
    let inputs = store.inputs_for_run(run_id).await?;
    let mut outputs: Vec<Product> = provenance::related_products(
        store,
        &run,
        &ProductQuery::new().is_input(false).use_superseded(true),
    )
    .await?;
    // inputs borrowed from earlier runs also match the query; a run's
    // outputs are only what it produced itself
    outputs.retain(|p| p.producing_pipeline_run_id == Some(run.id));

    let mut lines: Vec<String> = Vec::new();

    // summary
    let title = format!(
        "Pipeline Run #{}: '{}' v{}",
        run.id, run.pipeline_name, run.pipeline_version
    );
    let sep = "=".repeat(title.len());
    lines.push(sep.clone());
    lines.push(title.bold().to_string());
    lines.push(sep.clone());

    let start = format!("{} UTC", to_stamp(run.start_time_utc));
    let (end, duration) = match run.end_time_utc {
        Some(end) => (
            format!("{} UTC", to_stamp(end)),
            fmt_duration(end - run.start_time_utc),
        ),
        None => ("Unknown".to_string(), "Unknown".to_string()),
    };
    lines.push(format!("Start: {start}, End: {end}, Duration: {duration}"));
    lines.push(format!(
        "{} tasks run, {} inputs, {} outputs",
        task_runs.len(),
        inputs.len(),
        outputs.len()
    ));
    if let Some(log) = &run.log_filepath {
        lines.push(format!("Logfile: {log}"));
    }
    lines.push(String::new());

    // tasks
    lines.push(sep.clone());
    let num_success = task_runs
        .iter()
        .filter(|t| t.status_code == Some(STATUS_SUCCESS))
        .count();
    lines.push(format!(
        "Tasks: {} successful, {} failed, {} crashed",
        num_success,
        run.failed_tasks.len(),
        run.crashed_tasks.len()
    ));
    lines.push(sep.clone());
    lines.extend(task_lines(&task_runs));
    lines.push(String::new());

    // inputs and outputs
    lines.push(sep.clone());
    lines.push("Inputs and Outputs".bold().to_string());
    lines.push(sep.clone());

    lines.push("Input Types:".to_string());
    lines.extend(tally_lines(inputs.iter().map(Product::full_type)));
    lines.push("Input Provenances:".to_string());
    lines.extend(tally_lines(inputs.iter().map(provenance_label)));
    lines.push(String::new());

    lines.push("Output Types:".to_string());
    lines.extend(tally_lines(outputs.iter().map(Product::full_type)));
    lines.push("Producing Tasks:".to_string());
    lines.extend(tally_lines(outputs.iter().map(|p| p.task_name.clone())));
    lines.push(String::new());

    // config snapshot
    lines.push(sep.clone());
    lines.push("Config".bold().to_string());
    lines.push(sep);
    lines.push(render_config(&run));

    Ok(lines.join("\n"))
}

fn task_lines(task_runs: &[TaskRun]) -> Vec<String> {
    let name_pad = task_runs
        .iter()
        .map(|t| t.task_name.len())
        .max()
        .unwrap_or(0);
    let num_pad = 2 + task_runs.len().to_string().len();

    task_runs
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let status = match task.status_code {
                Some(STATUS_CRASHED) => "CRASHED".red().to_string(),
                Some(STATUS_SUCCESS) => "Success".green().to_string(),
                Some(code) => format!("FAILED (code {code})").red().to_string(),
                None => "Unfinished".yellow().to_string(),
            };
            let span = match task.end_time_utc {
                Some(end) => format!(
                    "{} - {} UTC ({})",
                    to_stamp(task.start_time_utc),
                    to_stamp(end),
                    fmt_duration(end - task.start_time_utc)
                ),
                None => format!("{} - ? UTC", to_stamp(task.start_time_utc)),
            };
            format!(
                "{:>num_pad$} {:<name_pad$}\t{}    {}",
                format!("#{}:", i + 1),
                task.task_name,
                span,
                status
            )
        })
        .collect()
}

fn provenance_label(product: &Product) -> String {
    if product.is_input {
        "User Input".to_string()
    } else {
        match product.producing_pipeline_run_id {
            Some(run_id) => format!("Run {run_id}"),
            None => "Unknown".to_string(),
        }
    }
}

fn tally_lines<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    tally(items)
        .into_iter()
        .map(|(key, count)| format!("    {key}: {count}"))
        .collect()
}

fn render_config(run: &PipelineRun) -> String {
    match serde_json::from_str::<serde_json::Value>(&run.config) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| run.config.clone()),
        Err(_) => run.config.clone(),
    }
}
