//! Vega CLI
//!
//! Operator tools for the Vega pipeline database: create a store and
//! inspect past runs and products.

mod commands;
mod db_path;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "vega")]
#[command(about = "Vega image-reduction pipeline inspection tools", long_about = None)]
struct Cli {
    /// Pipeline database path. Falls back to the DB_PATH key of the
    /// defaults document named by VEGA_DEFAULTS_PATH.
    #[arg(long, env = "VEGA_DB_PATH")]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vega_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    handle_command(cli.command, cli.db_path).await
}
