//! Database connection and schema management

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open a pool against a database URL (`sqlite:path` or `sqlite::memory:`).
///
/// The store is exclusively owned by one process for the duration of a
/// run, so a single connection is enough and keeps sqlite's locking out
/// of the picture.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

/// Open a pool against a database file, creating the file if requested.
pub async fn create_file_pool(path: &Path, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Run and task records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pipeline_name TEXT NOT NULL,
            pipeline_version TEXT NOT NULL,
            start_time_utc TEXT NOT NULL,
            end_time_utc TEXT,
            success INTEGER,
            failed_tasks TEXT,
            crashed_tasks TEXT,
            config TEXT NOT NULL,
            log_filepath TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            pipeline_run_id INTEGER REFERENCES pipeline_runs(id),
            parent_group_id INTEGER REFERENCES product_groups(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_name TEXT NOT NULL,
            start_time_utc TEXT NOT NULL,
            end_time_utc TEXT,
            status_code INTEGER,
            pipeline_run_id INTEGER NOT NULL REFERENCES pipeline_runs(id),
            product_group_id INTEGER REFERENCES product_groups(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data_type TEXT NOT NULL,
            data_subtype TEXT,
            task_name TEXT NOT NULL,
            product_location TEXT NOT NULL,
            creation_dt TEXT NOT NULL,
            is_input INTEGER NOT NULL,
            flags INTEGER,
            producing_pipeline_run_id INTEGER REFERENCES pipeline_runs(id),
            producing_task_run_id INTEGER REFERENCES task_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id),
            task_run_id INTEGER REFERENCES task_runs(id),
            key TEXT NOT NULL,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Association tables, composite primary keys
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_input_associations (
            pipeline_run_id INTEGER NOT NULL REFERENCES pipeline_runs(id),
            product_id INTEGER NOT NULL REFERENCES products(id),
            PRIMARY KEY (pipeline_run_id, product_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS precursor_product_associations (
            precursor_id INTEGER NOT NULL REFERENCES products(id),
            product_id INTEGER NOT NULL REFERENCES products(id),
            PRIMARY KEY (precursor_id, product_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS supersessor_associations (
            supersessor_id INTEGER NOT NULL REFERENCES products(id),
            superseded_id INTEGER NOT NULL REFERENCES products(id),
            PRIMARY KEY (supersessor_id, superseded_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_group_associations (
            product_group_id INTEGER NOT NULL REFERENCES product_groups(id),
            product_id INTEGER NOT NULL REFERENCES products(id),
            PRIMARY KEY (product_group_id, product_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_metadata_associations (
            product_id INTEGER NOT NULL REFERENCES products(id),
            metadata_id INTEGER NOT NULL REFERENCES metadata(id),
            PRIMARY KEY (product_id, metadata_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the hot lookup paths
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_producing_run ON products(producing_pipeline_run_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_producing_task ON products(producing_task_run_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_creation_dt ON products(creation_dt DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_runs_pipeline ON task_runs(pipeline_run_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metadata_key ON metadata(key)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
