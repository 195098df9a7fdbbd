//! Task contract and task-scoped context
//!
//! A [`Task`] is one step of a pipeline. It declares its contract up
//! front (the config keys it needs and will set, the product types it
//! consumes and emits) and the orchestrator holds it to that contract:
//! requirements are checked before anything executes, promises are
//! audited after the task reports success.
//!
//! `run` receives a [`TaskContext`] carrying everything a step may touch:
//! the shared configuration, the provenance store, the current run
//! records, and the task's group scope. Domain work (calibration,
//! alignment, photometry) lives behind this trait in downstream crates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vega_core::domain::group::{GroupPolicy, ProductGroup};
use vega_core::domain::metadata::MetadataRecord;
use vega_core::domain::product::Product;
use vega_core::domain::run::{PipelineRun, TaskRun};
use vega_core::query::ProductQuery;

use crate::config::Config;
use crate::error::Result;
use crate::provenance;
use crate::repository::products::NewProductRow;
use crate::store::PipelineStore;

/// One step of a pipeline.
///
/// `run` returns `Ok(0)` for success and any other `Ok(code)` for a
/// declared failure; returning `Err` is a crash. Either of the latter
/// halts the remaining tasks.
#[async_trait]
pub trait Task: Send {
    /// Task name. Recorded on every task run and product this task
    /// produces, so it should identify the step on its own.
    fn name(&self) -> &str;

    /// Human-readable summary of what the task does.
    fn description(&self) -> &str;

    /// Config keys that must be resolvable (from config or an earlier
    /// task's promises) before this task runs.
    fn required_params(&self) -> Vec<String>;

    /// Config keys this task promises to set while running.
    fn will_set(&self) -> Vec<String>;

    /// Product types (`"type"` or `"type.subtype"`) that must be present
    /// among the pipeline inputs or an earlier task's promised outputs.
    fn required_product_types(&self) -> Vec<String>;

    /// Product types this task promises to emit.
    fn product_types_produced(&self) -> Vec<String>;

    /// Filters applied to every product query this task makes.
    fn filters(&self) -> ProductQuery {
        ProductQuery::new()
    }

    /// Config profile selected for the duration of this task's run.
    fn config_profile(&self) -> Option<String> {
        None
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<i32>;
}

/// Description of an output product about to be published.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    data_type: String,
    data_subtype: Option<String>,
    location: String,
    flags: Option<i64>,
    precursors: Vec<i64>,
    metadata: Vec<(String, String)>,
}

impl OutputSpec {
    pub fn new(data_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            data_subtype: None,
            location: location.into(),
            flags: None,
            precursors: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.data_subtype = Some(subtype.into());
        self
    }

    pub fn flags(mut self, flags: i64) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn precursor(mut self, product: &Product) -> Self {
        self.precursors.push(product.id);
        self
    }

    pub fn precursors<'a>(mut self, products: impl IntoIterator<Item = &'a Product>) -> Self {
        self.precursors.extend(products.into_iter().map(|p| p.id));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Everything a running task may touch, scoped to its own task run.
pub struct TaskContext<'a> {
    config: &'a mut Config,
    store: &'a PipelineStore,
    pipeline_run: &'a PipelineRun,
    task_run: &'a TaskRun,
    group: Option<ProductGroup>,
    group_policy: GroupPolicy,
    filters: ProductQuery,
    outdir: &'a Path,
}

impl<'a> TaskContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &'a mut Config,
        store: &'a PipelineStore,
        pipeline_run: &'a PipelineRun,
        task_run: &'a TaskRun,
        group: Option<ProductGroup>,
        group_policy: GroupPolicy,
        filters: ProductQuery,
        outdir: &'a Path,
    ) -> Self {
        Self {
            config,
            store,
            pipeline_run,
            task_run,
            group,
            group_policy,
            filters,
            outdir,
        }
    }

    /// The shared run configuration, with this task's profile selected.
    pub fn config(&self) -> &Config {
        self.config
    }

    /// Mutable config access. Writes are visible to every later task.
    pub fn config_mut(&mut self) -> &mut Config {
        self.config
    }

    pub fn store(&self) -> &PipelineStore {
        self.store
    }

    pub fn pipeline_run(&self) -> &PipelineRun {
        self.pipeline_run
    }

    pub fn task_run(&self) -> &TaskRun {
        self.task_run
    }

    pub fn group(&self) -> Option<&ProductGroup> {
        self.group.as_ref()
    }

    pub fn group_policy(&self) -> GroupPolicy {
        self.group_policy
    }

    /// Output directory for this pipeline run.
    pub fn outdir(&self) -> &Path {
        self.outdir
    }

    /// Path for a file this task wants to write under the run's outdir.
    pub fn outpath(&self, file: &str) -> PathBuf {
        self.outdir.join(file)
    }

    /// Create and record a product of this task: producer ids set, group
    /// membership attached, declared precursors linked (propagating
    /// their metadata), and initial metadata written.
    pub async fn publish_output(&self, spec: OutputSpec) -> Result<Product> {
        let location = absolute_location(&spec.location);
        let product = self
            .store
            .record_product(NewProductRow {
                data_type: &spec.data_type,
                data_subtype: spec.data_subtype.as_deref(),
                task_name: &self.task_run.task_name,
                product_location: &location,
                creation_dt: chrono::Utc::now(),
                is_input: false,
                flags: spec.flags,
                producing_pipeline_run_id: Some(self.pipeline_run.id),
                producing_task_run_id: Some(self.task_run.id),
            })
            .await?;

        if let Some(group) = &self.group {
            self.store.add_product_to_group(group.id, product.id).await?;
        }

        for (key, value) in &spec.metadata {
            self.store
                .add_metadata(product.id, Some(self.task_run.id), key, value)
                .await?;
        }

        for precursor_id in &spec.precursors {
            self.store.add_precursor(product.id, *precursor_id).await?;
        }

        tracing::debug!("Task '{}' published {}", self.task_run.task_name, product);
        Ok(product)
    }

    /// Find products of the current run, scoped by this task's group
    /// policy and declared filters.
    pub async fn find_products(&self, query: ProductQuery) -> Result<Vec<Product>> {
        self.find_products_with_policy(query, self.group_policy)
            .await
    }

    /// [`TaskContext::find_products`] with an explicit policy override.
    pub async fn find_products_with_policy(
        &self,
        query: ProductQuery,
        policy: GroupPolicy,
    ) -> Result<Vec<Product>> {
        let query = query.merged_with(&self.filters);

        let Some(group) = &self.group else {
            return provenance::related_products(self.store, self.pipeline_run, &query).await;
        };

        match policy {
            GroupPolicy::Strict => {
                provenance::group_products(self.store, group.id, &query).await
            }
            GroupPolicy::PreviousOnly => {
                let mut group_products =
                    provenance::group_products(self.store, group.id, &query).await?;
                group_products.truncate(1);
                Ok(group_products)
            }
            GroupPolicy::Priority => {
                let group_products =
                    provenance::group_products(self.store, group.id, &query).await?;
                if group_products.is_empty() {
                    provenance::related_products(self.store, self.pipeline_run, &query).await
                } else {
                    Ok(group_products)
                }
            }
            GroupPolicy::AvoidOthers => {
                provenance::related_products_avoiding_groups(
                    self.store,
                    self.pipeline_run,
                    group.id,
                    &query,
                )
                .await
            }
            GroupPolicy::Ignore => {
                provenance::related_products(self.store, self.pipeline_run, &query).await
            }
        }
    }

    /// Attach a metadata pair to a product on behalf of this task.
    pub async fn add_metadata(
        &self,
        product: &Product,
        key: &str,
        value: &str,
    ) -> Result<MetadataRecord> {
        self.store
            .add_metadata(product.id, Some(self.task_run.id), key, value)
            .await
    }
}

fn absolute_location(location: &str) -> String {
    std::path::absolute(location)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| location.to_string())
}

/// Read query filters out of a config `[filters]` table. Recognized keys
/// map onto product columns; anything else is ignored with a warning.
pub(crate) fn filters_from_config(config: &Config) -> ProductQuery {
    let mut filters = ProductQuery::new();
    let Some(table) = config.get("filters").and_then(|v| v.as_table()) else {
        return filters;
    };

    for (key, value) in table {
        match (key.as_str(), value) {
            ("data_type", v) if v.is_str() => {
                filters.data_type = v.as_str().map(str::to_string);
            }
            ("data_subtype", v) if v.is_str() => {
                filters.data_subtype = v.as_str().map(str::to_string);
            }
            ("task_name", v) if v.is_str() => {
                filters.task_name = v.as_str().map(str::to_string);
            }
            ("product_location", v) if v.is_str() => {
                filters.product_location = v.as_str().map(str::to_string);
            }
            ("flags", v) if v.is_integer() => {
                filters.flags = v.as_integer();
            }
            ("is_input", v) if v.is_bool() => {
                filters.is_input = v.as_bool();
            }
            _ => {
                tracing::warn!("Ignoring unrecognized config filter '{key}'");
            }
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn store() -> PipelineStore {
        PipelineStore::open_in_memory().await.unwrap()
    }

    async fn run(store: &PipelineStore) -> PipelineRun {
        store
            .record_pipeline_start("reduce", "1.0", Utc::now(), "{}", None)
            .await
            .unwrap()
    }

    fn empty_config() -> Config {
        Config::from_table(toml::Table::new())
    }

    /// Publish one product per second of `age_secs` through a context
    /// bound to `group`.
    async fn publish(
        store: &PipelineStore,
        run: &PipelineRun,
        task_run: &TaskRun,
        group: Option<ProductGroup>,
        data_type: &str,
        location: &str,
        age_secs: i64,
    ) -> Product {
        let product = store
            .record_product(NewProductRow {
                data_type,
                data_subtype: None,
                task_name: &task_run.task_name,
                product_location: location,
                creation_dt: Utc::now() - Duration::seconds(age_secs),
                is_input: false,
                flags: None,
                producing_pipeline_run_id: Some(run.id),
                producing_task_run_id: Some(task_run.id),
            })
            .await
            .unwrap();
        if let Some(group) = group {
            store
                .add_product_to_group(group.id, product.id)
                .await
                .unwrap();
        }
        product
    }

    #[tokio::test]
    async fn test_publish_output_records_producers_and_lineage() {
        let store = store().await;
        let run = run(&store).await;
        let task_run = store
            .record_task_start("solve", Utc::now(), run.id, None)
            .await
            .unwrap();
        let raw = store
            .make_or_get_product("FitsImage", "INPUT", Utc::now(), "/d/raw.fits", None, None)
            .await
            .unwrap();
        store
            .add_metadata(raw.id, None, "FILTER", "r")
            .await
            .unwrap();

        let mut config = empty_config();
        let ctx = TaskContext::new(
            &mut config,
            &store,
            &run,
            &task_run,
            None,
            GroupPolicy::Ignore,
            ProductQuery::new(),
            Path::new("/tmp/out"),
        );

        let header = ctx
            .publish_output(
                OutputSpec::new("Header", "/d/raw.wcs")
                    .subtype("WCS")
                    .precursor(&raw)
                    .metadata("SOLVER", "astrometry"),
            )
            .await
            .unwrap();

        assert_eq!(header.producing_pipeline_run_id, Some(run.id));
        assert_eq!(header.producing_task_run_id, Some(task_run.id));
        assert_eq!(header.task_name, "solve");

        let precursors = store.precursors(header.id).await.unwrap();
        assert_eq!(precursors.len(), 1);
        assert_eq!(precursors[0].id, raw.id);

        // own metadata plus the precursor's propagated key
        let map = store.metadata_map(header.id).await.unwrap();
        assert_eq!(map.get("SOLVER").map(String::as_str), Some("astrometry"));
        assert_eq!(map.get("FILTER").map(String::as_str), Some("r"));
    }

    #[tokio::test]
    async fn test_group_policies() {
        let store = store().await;
        let run = run(&store).await;
        let r_group = store.ensure_group(run.id, "r-band").await.unwrap();
        let g_group = store.ensure_group(run.id, "g-band").await.unwrap();

        let r_task = store
            .record_task_start("stack", Utc::now(), run.id, Some(r_group.id))
            .await
            .unwrap();
        let g_task = store
            .record_task_start("stack", Utc::now(), run.id, Some(g_group.id))
            .await
            .unwrap();
        let free_task = store
            .record_task_start("solve", Utc::now(), run.id, None)
            .await
            .unwrap();

        let r_old = publish(
            &store,
            &run,
            &r_task,
            Some(r_group.clone()),
            "Coadd",
            "/d/r_old.fits",
            60,
        )
        .await;
        let r_new = publish(
            &store,
            &run,
            &r_task,
            Some(r_group.clone()),
            "Coadd",
            "/d/r_new.fits",
            10,
        )
        .await;
        let g_out = publish(
            &store,
            &run,
            &g_task,
            Some(g_group.clone()),
            "Coadd",
            "/d/g.fits",
            20,
        )
        .await;
        let free_out = publish(&store, &run, &free_task, None, "Coadd", "/d/free.fits", 5).await;

        let mut config = empty_config();
        let ctx = TaskContext::new(
            &mut config,
            &store,
            &run,
            &r_task,
            Some(r_group.clone()),
            GroupPolicy::Strict,
            ProductQuery::new(),
            Path::new("/tmp/out"),
        );

        // strict: only the group's products
        let found = ctx.find_products(ProductQuery::of_type("Coadd")).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![r_new.id, r_old.id]);

        // strict stays empty even when related products exist
        let found = ctx
            .find_products(ProductQuery::of_type("Header"))
            .await
            .unwrap();
        assert!(found.is_empty());

        // previous_only: single newest group product
        let found = ctx
            .find_products_with_policy(
                ProductQuery::of_type("Coadd"),
                GroupPolicy::PreviousOnly,
            )
            .await
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![r_new.id]);

        // priority with a non-empty group: group products only
        let found = ctx
            .find_products_with_policy(ProductQuery::of_type("Coadd"), GroupPolicy::Priority)
            .await
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![r_new.id, r_old.id]);

        // priority with an empty group: falls back to all related
        let empty_group = store.ensure_group(run.id, "i-band").await.unwrap();
        let empty_ctx = TaskContext::new(
            &mut config,
            &store,
            &run,
            &free_task,
            Some(empty_group),
            GroupPolicy::Priority,
            ProductQuery::new(),
            Path::new("/tmp/out"),
        );
        let found = empty_ctx
            .find_products(ProductQuery::of_type("Coadd"))
            .await
            .unwrap();
        assert_eq!(found.len(), 4);

        // ignore: group membership is irrelevant
        let mut config2 = empty_config();
        let ignore_ctx = TaskContext::new(
            &mut config2,
            &store,
            &run,
            &r_task,
            Some(r_group.clone()),
            GroupPolicy::Ignore,
            ProductQuery::new(),
            Path::new("/tmp/out"),
        );
        let found = ignore_ctx
            .find_products(ProductQuery::of_type("Coadd"))
            .await
            .unwrap();
        assert_eq!(found.len(), 4);

        // avoid_others: other groups' products hidden, ungrouped kept
        let found = ignore_ctx
            .find_products_with_policy(ProductQuery::of_type("Coadd"), GroupPolicy::AvoidOthers)
            .await
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|p| p.id).collect();
        assert!(ids.contains(&r_new.id));
        assert!(ids.contains(&r_old.id));
        assert!(ids.contains(&free_out.id));
        assert!(!ids.contains(&g_out.id));
    }

    #[test]
    fn test_filters_from_config() {
        let table = r#"
            [filters]
            data_type = "FitsImage"
            flags = 2
            bogus = "ignored"
        "#
        .parse::<toml::Table>()
        .unwrap();
        let config = Config::from_table(table);

        let filters = filters_from_config(&config);
        assert_eq!(filters.data_type.as_deref(), Some("FitsImage"));
        assert_eq!(filters.flags, Some(2));
        assert!(filters.task_name.is_none());
    }

    #[test]
    fn test_output_spec_builder() {
        let raw = Product {
            id: 7,
            data_type: "FitsImage".to_string(),
            data_subtype: None,
            task_name: "INPUT".to_string(),
            product_location: "/d/raw.fits".to_string(),
            creation_dt: Utc::now(),
            is_input: true,
            flags: None,
            producing_pipeline_run_id: None,
            producing_task_run_id: None,
        };

        let spec = OutputSpec::new("Header", "/d/raw.wcs")
            .subtype("WCS")
            .flags(4)
            .precursor(&raw)
            .metadata("SOLVER", "astrometry");

        assert_eq!(spec.data_type, "Header");
        assert_eq!(spec.data_subtype.as_deref(), Some("WCS"));
        assert_eq!(spec.flags, Some(4));
        assert_eq!(spec.precursors, vec![7]);
        assert_eq!(spec.metadata.len(), 1);
    }
}
