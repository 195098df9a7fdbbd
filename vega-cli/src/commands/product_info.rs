//! Product report command
//!
//! Formats one product's provenance: where it came from, what derived
//! from it, and its metadata.

use anyhow::Result;
use colored::*;
use vega_core::domain::product::Product;
use vega_core::time::to_stamp;
use vega_engine::{PipelineStore, provenance};

use super::tally;

pub async fn handle_product_info(db_path: &str, location: &str) -> Result<()> {
    let store = PipelineStore::open(db_path).await?;
    let report = product_info(&store, location).await?;
    println!("{report}");
    Ok(())
}

/// Build the full product report.
pub async fn product_info(store: &PipelineStore, location: &str) -> Result<String> {
    let product = store
        .find_product_by_location(location)
        .await?
        .ok_or_else(|| anyhow::anyhow!("couldn't find a product with location '{location}'"))?;

    let precursors = store.precursors(product.id).await?;
    let direct_derivatives = store.derivatives(product.id).await?;
    let mut all_derivatives = provenance::all_derivatives(store, &product, None).await?;
    all_derivatives.sort_by_key(|p| p.producing_pipeline_run_id);
    let metadata = store.metadata_map(product.id).await?;

    let mut lines: Vec<String> = Vec::new();

    // summary
    let title = format!("Product #{}: {}", product.id, product.full_type());
    let sep = "=".repeat(title.len());
    lines.push(sep.clone());
    lines.push(title.bold().to_string());
    lines.push(sep.clone());
    lines.push(format!(
        "{} immediate precursors and {} direct derivatives ({} total)",
        precursors.len(),
        direct_derivatives.len(),
        all_derivatives.len()
    ));
    lines.push(origin_line(store, &product).await?);
    lines.push(format!("Created {} UTC", to_stamp(product.creation_dt)));
    lines.push(product.product_location.clone());
    lines.push(String::new());

    // precursors and derivatives
    lines.push(sep.clone());
    lines.push("Precursors and Derivatives".bold().to_string());
    lines.push(sep.clone());
    if precursors.is_empty() {
        lines.push("No direct precursors.".to_string());
    } else {
        lines.push("Precursor Types:".to_string());
        lines.extend(tally_lines(precursors.iter().map(Product::full_type)));
        lines.push("Precursor Provenances:".to_string());
        lines.extend(tally_lines(precursors.iter().map(provenance_label)));
    }
    lines.push(String::new());

    lines.push("Derivative Types:".to_string());
    lines.extend(tally_lines(all_derivatives.iter().map(Product::full_type)));
    lines.push("Derivative-Producing Pipelines:".to_string());
    lines.extend(tally_lines(all_derivatives.iter().map(provenance_label)));
    lines.push(String::new());

    // metadata
    lines.push(sep.clone());
    lines.push("Metadata".bold().to_string());
    lines.push(sep);
    if metadata.is_empty() {
        lines.push("No metadata records.".to_string());
    } else {
        for (key, value) in &metadata {
            lines.push(format!("    {key} = {value}"));
        }
    }

    Ok(lines.join("\n"))
}

async fn origin_line(store: &PipelineStore, product: &Product) -> Result<String> {
    let pipeline = match product.producing_pipeline_run_id {
        Some(run_id) => Some(store.pipeline_run(run_id).await?),
        None => None,
    };

    if product.is_input {
        return Ok(match pipeline {
            Some(run) => format!("Origin: Input to pipeline run {run}"),
            None => "Origin: Registered input, not yet consumed by any run".to_string(),
        });
    }

    let task = match product.producing_task_run_id {
        Some(task_run_id) => Some(store.task_run(task_run_id).await?),
        None => None,
    };
    Ok(match (task, pipeline) {
        (Some(task), Some(run)) => {
            format!("Origin: Produced by task {task} as part of pipeline run {run}")
        }
        (Some(task), None) => format!("Origin: Produced by task {task}"),
        _ => "Origin: Unknown".to_string(),
    })
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
