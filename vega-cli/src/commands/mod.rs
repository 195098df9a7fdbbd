//! Command handlers

mod init;
mod product_info;
mod run_info;

use anyhow::Result;
use clap::Subcommand;

use crate::db_path::resolve_db_path;

#[derive(Subcommand)]
pub enum Commands {
    /// Create a pipeline database and install the schema
    Init {
        /// Path of the database file to create
        db_path: String,
    },
    /// Report on a past pipeline run
    RunInfo {
        /// Pipeline run ID
        run_id: i64,
    },
    /// Report on a product and its lineage
    ProductInfo {
        /// Product locator (usually the file path)
        location: String,
    },
}

/// Route commands to their handlers
pub async fn handle_command(command: Commands, db_path: Option<String>) -> Result<()> {
    match command {
        Commands::Init { db_path } => init::handle_init(&db_path).await,
        Commands::RunInfo { run_id } => {
            let db_path = resolve_db_path(db_path)?;
            run_info::handle_run_info(&db_path, run_id).await
        }
        Commands::ProductInfo { location } => {
            let db_path = resolve_db_path(db_path)?;
            product_info::handle_product_info(&db_path, &location).await
        }
    }
}

/// Format a span between two timestamps as `H:MM:SS`.
pub(crate) fn fmt_duration(delta: chrono::TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Count occurrences, preserving first-seen order.
pub(crate) fn tally<I: IntoIterator<Item = String>>(items: I) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(key, _)| *key == item) {
            Some((_, count)) => *count += 1,
            None => counts.push((item, 1)),
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_duration() {
        assert_eq!(fmt_duration(chrono::TimeDelta::seconds(5)), "0:00:05");
        assert_eq!(fmt_duration(chrono::TimeDelta::seconds(3725)), "1:02:05");
        assert_eq!(fmt_duration(chrono::TimeDelta::seconds(-3)), "0:00:00");
    }

    #[test]
    fn test_tally_preserves_order() {
        let counts = tally(
            ["b", "a", "b", "b"]
                .into_iter()
                .map(str::to_string),
        );
        assert_eq!(
            counts,
            vec![("b".to_string(), 3), ("a".to_string(), 1)]
        );
    }
}
