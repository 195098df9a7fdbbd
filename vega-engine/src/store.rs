//! Pipeline store
//!
//! [`PipelineStore`] is the persistence boundary for the whole engine: it
//! owns the connection pool and exposes the lifecycle records, product
//! recording, lineage edges, and metadata operations tasks and the
//! orchestrator use. Every mutating call commits before returning, so a
//! crash mid-pipeline leaves a consistent, queryable partial history.
//!
//! The store is append-only: runs and tasks are finalized in place, but
//! products and metadata are never deleted or overwritten.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use vega_core::domain::group::ProductGroup;
use vega_core::domain::metadata::MetadataRecord;
use vega_core::domain::product::Product;
use vega_core::domain::run::{PipelineRun, TaskRun};

use crate::db;
use crate::error::{EngineError, Result};
use crate::repository::{groups, metadata, products, runs};

/// SQLite-backed provenance store.
#[derive(Debug)]
pub struct PipelineStore {
    pool: SqlitePool,
}

impl PipelineStore {
    /// Open an existing store. Fails with NotFound if the file does not
    /// exist, so a typo'd path can't silently spawn an empty database.
    /// Use [`PipelineStore::create`] (or the CLI's `init`) to make one.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::not_found(format!(
                "no pipeline database at {}. Run 'vega init' with a path to create one, or check that this path is correct",
                path.display()
            )));
        }
        let pool = db::create_file_pool(path, false).await?;
        // schema upgrades for stores created by older builds
        db::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create (or open) a store at `path` and install the schema.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let pool = db::create_file_pool(path, true).await?;
        db::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = db::create_pool("sqlite::memory:").await?;
        db::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Run lifecycle
    // =========================================================================

    pub async fn record_pipeline_start(
        &self,
        pipeline_name: &str,
        pipeline_version: &str,
        start: DateTime<Utc>,
        config_json: &str,
        log_filepath: Option<&str>,
    ) -> Result<PipelineRun> {
        let run = runs::create_pipeline_run(
            &self.pool,
            pipeline_name,
            pipeline_version,
            start,
            config_json,
            log_filepath,
        )
        .await?;
        Ok(run)
    }

    /// Finalize a run record and mirror the result onto the in-memory
    /// value. Called exactly once per run.
    pub async fn record_pipeline_end(
        &self,
        run: &mut PipelineRun,
        end: DateTime<Utc>,
        success: bool,
        failed: Vec<String>,
        crashed: Vec<String>,
    ) -> Result<()> {
        runs::finalize_pipeline_run(&self.pool, run.id, end, success, &failed, &crashed).await?;
        run.end_time_utc = Some(end);
        run.success = Some(success);
        run.failed_tasks = failed;
        run.crashed_tasks = crashed;
        Ok(())
    }

    pub async fn record_task_start(
        &self,
        task_name: &str,
        start: DateTime<Utc>,
        pipeline_run_id: i64,
        product_group_id: Option<i64>,
    ) -> Result<TaskRun> {
        let task_run = runs::create_task_run(
            &self.pool,
            task_name,
            start,
            pipeline_run_id,
            product_group_id,
        )
        .await?;
        Ok(task_run)
    }

    pub async fn record_task_end(
        &self,
        task_run: &mut TaskRun,
        end: DateTime<Utc>,
        status_code: i32,
    ) -> Result<()> {
        runs::finalize_task_run(&self.pool, task_run.id, end, status_code).await?;
        task_run.end_time_utc = Some(end);
        task_run.status_code = Some(status_code);
        Ok(())
    }

    pub async fn pipeline_run(&self, run_id: i64) -> Result<PipelineRun> {
        runs::find_pipeline_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("pipeline run #{run_id}")))
    }

    pub async fn task_run(&self, task_run_id: i64) -> Result<TaskRun> {
        runs::find_task_run(&self.pool, task_run_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("task run #{task_run_id}")))
    }

    pub async fn task_runs_for(&self, run_id: i64) -> Result<Vec<TaskRun>> {
        Ok(runs::task_runs_for(&self.pool, run_id).await?)
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Record a freshly produced product row.
    pub async fn record_product(&self, row: products::NewProductRow<'_>) -> Result<Product> {
        Ok(products::insert_product(&self.pool, row).await?)
    }

    /// Look up a product by the `(location, type, flags, subtype)`
    /// identity, inserting an input-flagged row only if none exists.
    pub async fn make_or_get_product(
        &self,
        data_type: &str,
        task_name: &str,
        creation_dt: DateTime<Utc>,
        product_location: &str,
        flags: Option<i64>,
        data_subtype: Option<&str>,
    ) -> Result<Product> {
        if let Some(existing) = products::find_matching_product(
            &self.pool,
            product_location,
            data_type,
            flags,
            data_subtype,
        )
        .await?
        {
            return Ok(existing);
        }

        let product = products::insert_product(
            &self.pool,
            products::NewProductRow {
                data_type,
                data_subtype,
                task_name,
                product_location,
                creation_dt,
                is_input: true,
                flags,
                producing_pipeline_run_id: None,
                producing_task_run_id: None,
            },
        )
        .await?;
        Ok(product)
    }

    /// Register a product as an input of a run. Idempotent: re-supplying
    /// an already-registered product is a no-op lookup. The first run to
    /// consume an unowned input claims it and stamps its task name.
    pub async fn record_input_data(&self, product: &Product, run: &PipelineRun) -> Result<Product> {
        if product.producing_pipeline_run_id.is_none() {
            products::claim_input_for_run(&self.pool, product.id, run.id).await?;
        }
        products::add_input_association(&self.pool, run.id, product.id).await?;

        let registered = self.product(product.id).await?;
        tracing::info!("Logged {} as input to {}", registered, run);
        Ok(registered)
    }

    pub async fn product(&self, product_id: i64) -> Result<Product> {
        products::find_product(&self.pool, product_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("product #{product_id}")))
    }

    pub async fn find_product_by_location(&self, location: &str) -> Result<Option<Product>> {
        Ok(products::find_product_by_location(&self.pool, location).await?)
    }

    /// Move a product's locator. The row itself is otherwise immutable.
    pub async fn move_product(&self, product_id: i64, new_location: &str) -> Result<()> {
        Ok(products::update_product_location(&self.pool, product_id, new_location).await?)
    }

    pub async fn inputs_for_run(&self, run_id: i64) -> Result<Vec<Product>> {
        Ok(products::inputs_for_run(&self.pool, run_id).await?)
    }

    // =========================================================================
    // Lineage edges
    // =========================================================================

    /// Link `precursor` as a product's precursor, then attach the
    /// precursor's metadata records for keys the product lacks. Existing
    /// keys are never overwritten.
    pub async fn add_precursor(&self, product_id: i64, precursor_id: i64) -> Result<()> {
        products::add_precursor_association(&self.pool, product_id, precursor_id).await?;
        self.propagate_metadata(precursor_id, product_id).await
    }

    /// Link `derivative` as a product's derivative, then attach the
    /// product's metadata records for keys the derivative lacks.
    pub async fn add_derivative(&self, product_id: i64, derivative_id: i64) -> Result<()> {
        products::add_precursor_association(&self.pool, derivative_id, product_id).await?;
        self.propagate_metadata(product_id, derivative_id).await
    }

    async fn propagate_metadata(&self, from_product: i64, to_product: i64) -> Result<()> {
        let mut present: std::collections::BTreeSet<String> = metadata::records_for_product(
            &self.pool,
            to_product,
        )
        .await?
        .into_iter()
        .map(|record| record.key)
        .collect();

        for record in metadata::records_for_product(&self.pool, from_product).await? {
            if present.insert(record.key.clone()) {
                metadata::associate(&self.pool, to_product, record.id).await?;
            }
        }
        Ok(())
    }

    pub async fn precursors(&self, product_id: i64) -> Result<Vec<Product>> {
        Ok(products::precursors_of(&self.pool, product_id).await?)
    }

    pub async fn derivatives(&self, product_id: i64) -> Result<Vec<Product>> {
        Ok(products::derivatives_of(&self.pool, product_id).await?)
    }

    /// Mark `supersessor` as replacing `superseded`. The superseded
    /// product disappears from default queries within the supersessor's
    /// producing run.
    pub async fn supersede(&self, supersessor_id: i64, superseded_id: i64) -> Result<()> {
        Ok(products::add_supersessor_association(&self.pool, supersessor_id, superseded_id).await?)
    }

    pub async fn supersessors(&self, product_id: i64) -> Result<Vec<Product>> {
        Ok(products::supersessors_of(&self.pool, product_id).await?)
    }

    pub async fn superseded(&self, product_id: i64) -> Result<Vec<Product>> {
        Ok(products::superseded_by(&self.pool, product_id).await?)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Write a metadata record for a product. Duplicate keys append a
    /// new record; reads resolve newest-wins (see [`Self::metadata_map`]).
    pub async fn add_metadata(
        &self,
        product_id: i64,
        task_run_id: Option<i64>,
        key: &str,
        value: &str,
    ) -> Result<MetadataRecord> {
        Ok(metadata::insert_record(&self.pool, product_id, task_run_id, key, value).await?)
    }

    /// All metadata records attached to a product, oldest first.
    pub async fn metadata_for(&self, product_id: i64) -> Result<Vec<MetadataRecord>> {
        Ok(metadata::records_for_product(&self.pool, product_id).await?)
    }

    /// A product's metadata as a key/value map. Records are folded in
    /// ascending record order, so the newest record wins a duplicate key.
    pub async fn metadata_map(&self, product_id: i64) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for record in self.metadata_for(product_id).await? {
            map.insert(record.key, record.value);
        }
        Ok(map)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub async fn create_group(
        &self,
        name: Option<&str>,
        pipeline_run_id: Option<i64>,
        parent_group_id: Option<i64>,
    ) -> Result<ProductGroup> {
        Ok(groups::create_group(&self.pool, name, pipeline_run_id, parent_group_id).await?)
    }

    /// Find or create a run's named group.
    pub async fn ensure_group(&self, pipeline_run_id: i64, name: &str) -> Result<ProductGroup> {
        if let Some(group) = groups::find_group_by_name(&self.pool, pipeline_run_id, name).await? {
            return Ok(group);
        }
        Ok(groups::create_group(&self.pool, Some(name), Some(pipeline_run_id), None).await?)
    }

    pub async fn group(&self, group_id: i64) -> Result<ProductGroup> {
        groups::find_group(&self.pool, group_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("product group #{group_id}")))
    }

    pub async fn add_product_to_group(&self, group_id: i64, product_id: i64) -> Result<()> {
        Ok(groups::add_product_to_group(&self.pool, group_id, product_id).await?)
    }

    pub async fn products_in_group(&self, group_id: i64) -> Result<Vec<Product>> {
        Ok(groups::products_in_group(&self.pool, group_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::products::NewProductRow;

    async fn store() -> PipelineStore {
        PipelineStore::open_in_memory().await.unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    async fn input(store: &PipelineStore, data_type: &str, location: &str) -> Product {
        store
            .make_or_get_product(data_type, "INPUT", now(), location, None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_missing_store_is_not_found() {
        let err = PipelineStore::open("/no/such/vega.db").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_make_or_get_product_is_idempotent() {
        let store = store().await;
        let first = input(&store, "FitsImage", "/data/a.fits").await;
        let second = input(&store, "FitsImage", "/data/a.fits").await;
        assert_eq!(first.id, second.id);

        // different subtype means a different identity
        let third = store
            .make_or_get_product("FitsImage", "INPUT", now(), "/data/a.fits", None, Some("Raw"))
            .await
            .unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_record_input_data_claims_unowned_products() {
        let store = store().await;
        let run = store
            .record_pipeline_start("reduce", "1.0", now(), "{}", None)
            .await
            .unwrap();

        let product = input(&store, "FitsImage", "/data/a.fits").await;
        assert!(product.producing_pipeline_run_id.is_none());

        let registered = store.record_input_data(&product, &run).await.unwrap();
        assert_eq!(registered.producing_pipeline_run_id, Some(run.id));
        assert_eq!(registered.task_name, "INPUT");

        // registering again is a no-op
        let again = store.record_input_data(&registered, &run).await.unwrap();
        assert_eq!(again.id, registered.id);
        assert_eq!(store.inputs_for_run(run.id).await.unwrap().len(), 1);

        // a second run does not steal ownership
        let run2 = store
            .record_pipeline_start("reduce", "1.0", now(), "{}", None)
            .await
            .unwrap();
        let reused = store.record_input_data(&registered, &run2).await.unwrap();
        assert_eq!(reused.producing_pipeline_run_id, Some(run.id));
    }

    #[tokio::test]
    async fn test_precursor_edges_are_symmetric() {
        let store = store().await;
        let parent = input(&store, "FitsImage", "/data/a.fits").await;
        let child = input(&store, "Catalog", "/data/a.cat").await;

        store.add_derivative(parent.id, child.id).await.unwrap();

        let derivatives = store.derivatives(parent.id).await.unwrap();
        let precursors = store.precursors(child.id).await.unwrap();
        assert_eq!(derivatives.len(), 1);
        assert_eq!(derivatives[0].id, child.id);
        assert_eq!(precursors.len(), 1);
        assert_eq!(precursors[0].id, parent.id);
    }

    #[tokio::test]
    async fn test_metadata_propagates_without_overwrite() {
        let store = store().await;
        let parent = input(&store, "FitsImage", "/data/a.fits").await;
        let child = input(&store, "Catalog", "/data/a.cat").await;

        store
            .add_metadata(parent.id, None, "FILTER", "r")
            .await
            .unwrap();
        store
            .add_metadata(parent.id, None, "AIRMASS", "1.2")
            .await
            .unwrap();
        store
            .add_metadata(child.id, None, "FILTER", "g")
            .await
            .unwrap();

        store.add_precursor(child.id, parent.id).await.unwrap();

        let map = store.metadata_map(child.id).await.unwrap();
        // inherited key arrives with the parent's value
        assert_eq!(map.get("AIRMASS").map(String::as_str), Some("1.2"));
        // the child's own value is not overwritten
        assert_eq!(map.get("FILTER").map(String::as_str), Some("g"));
    }

    #[tokio::test]
    async fn test_duplicate_metadata_key_reads_newest() {
        let store = store().await;
        let product = input(&store, "FitsImage", "/data/a.fits").await;

        store
            .add_metadata(product.id, None, "ZEROPOINT", "24.9")
            .await
            .unwrap();
        store
            .add_metadata(product.id, None, "ZEROPOINT", "25.1")
            .await
            .unwrap();

        assert_eq!(store.metadata_for(product.id).await.unwrap().len(), 2);
        let map = store.metadata_map(product.id).await.unwrap();
        assert_eq!(map.get("ZEROPOINT").map(String::as_str), Some("25.1"));
    }

    #[tokio::test]
    async fn test_ensure_group_reuses_named_groups() {
        let store = store().await;
        let run = store
            .record_pipeline_start("reduce", "1.0", now(), "{}", None)
            .await
            .unwrap();

        let first = store.ensure_group(run.id, "r-band").await.unwrap();
        let second = store.ensure_group(run.id, "r-band").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = store.ensure_group(run.id, "g-band").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_record_product_row() {
        let store = store().await;
        let run = store
            .record_pipeline_start("reduce", "1.0", now(), "{}", None)
            .await
            .unwrap();
        let task = store
            .record_task_start("align", now(), run.id, None)
            .await
            .unwrap();

        let product = store
            .record_product(NewProductRow {
                data_type: "Header",
                data_subtype: Some("WCS"),
                task_name: "align",
                product_location: "/data/a.wcs",
                creation_dt: now(),
                is_input: false,
                flags: Some(2),
                producing_pipeline_run_id: Some(run.id),
                producing_task_run_id: Some(task.id),
            })
            .await
            .unwrap();

        let fetched = store.product(product.id).await.unwrap();
        assert_eq!(fetched.full_type(), "Header.WCS");
        assert_eq!(fetched.producing_task_run_id, Some(task.id));
        assert!(!fetched.is_input);
    }
}
