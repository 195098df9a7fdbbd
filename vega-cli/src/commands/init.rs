//! Database creation command

use anyhow::Result;
use colored::*;
use vega_engine::PipelineStore;

/// Create a pipeline database at the given path.
pub async fn handle_init(db_path: &str) -> Result<()> {
    PipelineStore::create(db_path).await?;
    println!(
        "{}",
        format!("Created pipeline database at {db_path}").green()
    );
    println!(
        "{}",
        "Point DB_PATH in your defaults document here to use it.".dimmed()
    );
    Ok(())
}
