//! Metadata repository
//!
//! Records are owned by the product they were first written for and
//! attached to any number of products through the association table.
//! Lineage propagation attaches existing records instead of copying
//! them, so one record can annotate a whole derivation chain.

use sqlx::SqlitePool;
use vega_core::domain::metadata::MetadataRecord;

/// Insert a metadata record and attach it to its owning product.
pub async fn insert_record(
    pool: &SqlitePool,
    product_id: i64,
    task_run_id: Option<i64>,
    key: &str,
    value: &str,
) -> Result<MetadataRecord, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO metadata (product_id, task_run_id, key, value) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(product_id)
    .bind(task_run_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    let record = MetadataRecord {
        id: result.last_insert_rowid(),
        product_id,
        task_run_id,
        key: key.to_string(),
        value: value.to_string(),
    };

    associate(pool, product_id, record.id).await?;

    Ok(record)
}

/// Attach an existing record to a product. Re-attaching is a no-op.
pub async fn associate(
    pool: &SqlitePool,
    product_id: i64,
    metadata_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO product_metadata_associations (product_id, metadata_id) VALUES (?1, ?2)",
    )
    .bind(product_id)
    .bind(metadata_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// All records attached to a product, oldest record first. Callers that
/// fold this into a map get last-writer-wins on duplicate keys.
pub async fn records_for_product(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Vec<MetadataRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MetadataRow>(
        r#"
        SELECT m.id, m.product_id, m.task_run_id, m.key, m.value
        FROM metadata m
        JOIN product_metadata_associations pma ON pma.metadata_id = m.id
        WHERE pma.product_id = ?1
        ORDER BY m.id ASC
        "#,
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MetadataRow::into_record).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct MetadataRow {
    id: i64,
    product_id: i64,
    task_run_id: Option<i64>,
    key: String,
    value: String,
}

impl MetadataRow {
    fn into_record(self) -> MetadataRecord {
        MetadataRecord {
            id: self.id,
            product_id: self.product_id,
            task_run_id: self.task_run_id,
            key: self.key,
            value: self.value,
        }
    }
}
