//! Product repository
//!
//! Row operations for products and the edge tables that hang off them
//! (inputs, precursors, supersessors).

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use vega_core::domain::product::Product;
use vega_core::time::{from_stamp, to_stamp};

/// Column list shared by every product SELECT.
pub(crate) const PRODUCT_COLUMNS: &str = "id, data_type, data_subtype, task_name, \
     product_location, creation_dt, is_input, flags, \
     producing_pipeline_run_id, producing_task_run_id";

/// Fields for a product row about to be inserted.
pub struct NewProductRow<'a> {
    pub data_type: &'a str,
    pub data_subtype: Option<&'a str>,
    pub task_name: &'a str,
    pub product_location: &'a str,
    pub creation_dt: DateTime<Utc>,
    pub is_input: bool,
    pub flags: Option<i64>,
    pub producing_pipeline_run_id: Option<i64>,
    pub producing_task_run_id: Option<i64>,
}

/// Insert a product row.
pub async fn insert_product(
    pool: &SqlitePool,
    row: NewProductRow<'_>,
) -> Result<Product, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO products (
            data_type, data_subtype, task_name, product_location, creation_dt,
            is_input, flags, producing_pipeline_run_id, producing_task_run_id
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(row.data_type)
    .bind(row.data_subtype)
    .bind(row.task_name)
    .bind(row.product_location)
    .bind(to_stamp(row.creation_dt))
    .bind(row.is_input)
    .bind(row.flags)
    .bind(row.producing_pipeline_run_id)
    .bind(row.producing_task_run_id)
    .execute(pool)
    .await?;

    Ok(Product {
        id: result.last_insert_rowid(),
        data_type: row.data_type.to_string(),
        data_subtype: row.data_subtype.map(str::to_string),
        task_name: row.task_name.to_string(),
        product_location: row.product_location.to_string(),
        creation_dt: row.creation_dt,
        is_input: row.is_input,
        flags: row.flags,
        producing_pipeline_run_id: row.producing_pipeline_run_id,
        producing_task_run_id: row.producing_task_run_id,
    })
}

/// Find a product by ID
pub async fn find_product(pool: &SqlitePool, id: i64) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ProductRow::into_product))
}

/// Find the newest product pinned at a location.
pub async fn find_product_by_location(
    pool: &SqlitePool,
    location: &str,
) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE product_location = ?1 ORDER BY id DESC"
    ))
    .bind(location)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ProductRow::into_product))
}

/// Look up an existing product by the identity quadruple used for
/// idempotent input registration.
pub async fn find_matching_product(
    pool: &SqlitePool,
    location: &str,
    data_type: &str,
    flags: Option<i64>,
    data_subtype: Option<&str>,
) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE product_location = ?1 AND data_type = ?2
          AND flags IS ?3 AND data_subtype IS ?4
        "#
    ))
    .bind(location)
    .bind(data_type)
    .bind(flags)
    .bind(data_subtype)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ProductRow::into_product))
}

/// Move a product to a new location. The one mutation products allow
/// besides new edges.
pub async fn update_product_location(
    pool: &SqlitePool,
    product_id: i64,
    location: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE products SET product_location = ?1 WHERE id = ?2")
        .bind(location)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stamp an unowned input product with the run that first consumed it.
pub async fn claim_input_for_run(
    pool: &SqlitePool,
    product_id: i64,
    pipeline_run_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE products SET producing_pipeline_run_id = ?1, task_name = 'INPUT'
        WHERE id = ?2 AND producing_pipeline_run_id IS NULL
        "#,
    )
    .bind(pipeline_run_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Associate a product as an input of a run. Re-association is a no-op.
pub async fn add_input_association(
    pool: &SqlitePool,
    pipeline_run_id: i64,
    product_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO pipeline_input_associations (pipeline_run_id, product_id) VALUES (?1, ?2)",
    )
    .bind(pipeline_run_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// List the registered inputs of a run.
pub async fn inputs_for_run(
    pool: &SqlitePool,
    pipeline_run_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT product_id FROM pipeline_input_associations WHERE pipeline_run_id = ?1
        )
        ORDER BY id ASC
        "#
    ))
    .bind(pipeline_run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

/// Whether a product is registered as an input of a run.
pub async fn is_input_of_run(
    pool: &SqlitePool,
    product_id: i64,
    pipeline_run_id: i64,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pipeline_input_associations WHERE product_id = ?1 AND pipeline_run_id = ?2",
    )
    .bind(product_id)
    .bind(pipeline_run_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Record a precursor edge. Duplicate edges are ignored.
pub async fn add_precursor_association(
    pool: &SqlitePool,
    product_id: i64,
    precursor_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO precursor_product_associations (precursor_id, product_id) VALUES (?1, ?2)",
    )
    .bind(precursor_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Products this product was derived from.
pub async fn precursors_of(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT precursor_id FROM precursor_product_associations WHERE product_id = ?1
        )
        ORDER BY id ASC
        "#
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

/// Products derived from this product.
pub async fn derivatives_of(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT product_id FROM precursor_product_associations WHERE precursor_id = ?1
        )
        ORDER BY id ASC
        "#
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

/// Record a supersession edge. Duplicate edges are ignored.
pub async fn add_supersessor_association(
    pool: &SqlitePool,
    supersessor_id: i64,
    superseded_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO supersessor_associations (supersessor_id, superseded_id) VALUES (?1, ?2)",
    )
    .bind(supersessor_id)
    .bind(superseded_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newer products that replace this one.
pub async fn supersessors_of(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT supersessor_id FROM supersessor_associations WHERE superseded_id = ?1
        )
        ORDER BY id ASC
        "#
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

/// Older products this one replaces.
pub async fn superseded_by(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT superseded_id FROM supersessor_associations WHERE supersessor_id = ?1
        )
        ORDER BY id ASC
        "#
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct ProductRow {
    id: i64,
    data_type: String,
    data_subtype: Option<String>,
    task_name: String,
    product_location: String,
    creation_dt: String,
    is_input: bool,
    flags: Option<i64>,
    producing_pipeline_run_id: Option<i64>,
    producing_task_run_id: Option<i64>,
}

impl ProductRow {
    pub(crate) fn into_product(self) -> Product {
        Product {
            id: self.id,
            data_type: self.data_type,
            data_subtype: self.data_subtype,
            task_name: self.task_name,
            product_location: self.product_location,
            creation_dt: from_stamp(&self.creation_dt).unwrap_or_default(),
            is_input: self.is_input,
            flags: self.flags,
            producing_pipeline_run_id: self.producing_pipeline_run_id,
            producing_task_run_id: self.producing_task_run_id,
        }
    }
}
