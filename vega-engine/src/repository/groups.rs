//! Product group repository

use sqlx::SqlitePool;
use vega_core::domain::group::ProductGroup;

use super::products::{PRODUCT_COLUMNS, ProductRow};
use vega_core::domain::product::Product;

/// Create a product group, optionally named, run-scoped, or nested.
pub async fn create_group(
    pool: &SqlitePool,
    name: Option<&str>,
    pipeline_run_id: Option<i64>,
    parent_group_id: Option<i64>,
) -> Result<ProductGroup, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO product_groups (name, pipeline_run_id, parent_group_id) VALUES (?1, ?2, ?3)",
    )
    .bind(name)
    .bind(pipeline_run_id)
    .bind(parent_group_id)
    .execute(pool)
    .await?;

    Ok(ProductGroup {
        id: result.last_insert_rowid(),
        name: name.map(str::to_string),
        pipeline_run_id,
        parent_group_id,
    })
}

/// Find a group by ID
pub async fn find_group(
    pool: &SqlitePool,
    group_id: i64,
) -> Result<Option<ProductGroup>, sqlx::Error> {
    sqlx::query_as::<_, GroupRow>(
        "SELECT id, name, pipeline_run_id, parent_group_id FROM product_groups WHERE id = ?1",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await
    .map(|row| row.map(GroupRow::into_group))
}

/// Find a run's group by name.
pub async fn find_group_by_name(
    pool: &SqlitePool,
    pipeline_run_id: i64,
    name: &str,
) -> Result<Option<ProductGroup>, sqlx::Error> {
    sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT id, name, pipeline_run_id, parent_group_id
        FROM product_groups
        WHERE pipeline_run_id = ?1 AND name = ?2
        "#,
    )
    .bind(pipeline_run_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .map(|row| row.map(GroupRow::into_group))
}

/// Direct children of a group.
pub async fn child_groups(
    pool: &SqlitePool,
    group_id: i64,
) -> Result<Vec<ProductGroup>, sqlx::Error> {
    let rows = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT id, name, pipeline_run_id, parent_group_id
        FROM product_groups
        WHERE parent_group_id = ?1
        ORDER BY id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(GroupRow::into_group).collect())
}

/// Add a product to a group. Re-adding is a no-op.
pub async fn add_product_to_group(
    pool: &SqlitePool,
    group_id: i64,
    product_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO product_group_associations (product_group_id, product_id) VALUES (?1, ?2)",
    )
    .bind(group_id)
    .bind(product_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Members of a group, newest first.
pub async fn products_in_group(
    pool: &SqlitePool,
    group_id: i64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE id IN (
            SELECT product_id FROM product_group_associations WHERE product_group_id = ?1
        )
        ORDER BY creation_dt DESC, id DESC
        "#
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    name: Option<String>,
    pipeline_run_id: Option<i64>,
    parent_group_id: Option<i64>,
}

impl GroupRow {
    fn into_group(self) -> ProductGroup {
        ProductGroup {
            id: self.id,
            name: self.name,
            pipeline_run_id: self.pipeline_run_id,
            parent_group_id: self.parent_group_id,
        }
    }
}
