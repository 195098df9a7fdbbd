//! Pipeline orchestrator
//!
//! A [`Pipeline`] executes an ordered task list against one provenance
//! store. The life of a run:
//!
//! 1. `validate`: every task's required config keys and product types
//!    must be satisfiable from configuration, the supplied inputs, or an
//!    earlier task's promises. Nothing executes if this fails.
//! 2. `run`: record the run, register inputs, then execute tasks
//!    strictly in order. The first nonzero status or crash halts the
//!    remaining tasks.
//! 3. After each successful task, the honesty audit compares the task's
//!    promises against its observed effects and logs mismatches as
//!    warnings. Advisory only; the run continues.
//!
//! Task failures and crashes are recorded and returned in the
//! [`RunOutcome`] rather than raised; only validation and store errors
//! propagate as `Err`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use vega_core::domain::group::GroupPolicy;
use vega_core::domain::product::Product;
use vega_core::domain::run::{PipelineRun, STATUS_CRASHED, STATUS_SUCCESS, TaskRun};
use vega_core::query::ProductQuery;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::provenance;
use crate::store::PipelineStore;
use crate::task::{Task, TaskContext, filters_from_config};

/// Key the store path is read from when connecting via configuration.
pub const DB_PATH_KEY: &str = "DB_PATH";

struct TaskEntry {
    task: Box<dyn Task>,
    group: Option<String>,
    policy: GroupPolicy,
}

/// Sequential task orchestrator bound to one store and one config.
pub struct Pipeline {
    name: String,
    version: String,
    outdir: PathBuf,
    config: Config,
    store: PipelineStore,
    entries: Vec<TaskEntry>,
    log_filepath: PathBuf,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        outdir: impl Into<PathBuf>,
        config: Config,
        store: PipelineStore,
    ) -> Self {
        let name = name.into();
        let outdir = outdir.into();
        let log_filepath = outdir.join(format!("{name}.log"));
        Self {
            name,
            version: version.into(),
            outdir,
            config,
            store,
            entries: Vec::new(),
            log_filepath,
        }
    }

    /// Open the store named by the defaults document's `DB_PATH` key and
    /// build a pipeline on it. The database path may only come from the
    /// defaults layer.
    pub async fn connect(
        name: impl Into<String>,
        version: impl Into<String>,
        outdir: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Self> {
        let db_path = config
            .require_default(DB_PATH_KEY)?
            .as_str()
            .ok_or_else(|| EngineError::Config(format!("'{DB_PATH_KEY}' is not a string")))?
            .to_string();
        let store = PipelineStore::open(&db_path).await?;
        Ok(Self::new(name, version, outdir, config, store))
    }

    /// Append a task to the execution order.
    pub fn with_task(mut self, task: Box<dyn Task>) -> Self {
        self.entries.push(TaskEntry {
            task,
            group: None,
            policy: GroupPolicy::default(),
        });
        self
    }

    /// Append a task bound to a named product group. The group is
    /// created per run; `policy` governs how the task's product lookups
    /// fall back outside the group.
    pub fn with_grouped_task(
        mut self,
        task: Box<dyn Task>,
        group: impl Into<String>,
        policy: GroupPolicy,
    ) -> Self {
        self.entries.push(TaskEntry {
            task,
            group: Some(group.into()),
            policy,
        });
        self
    }

    /// Override the log locator recorded on the run.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_filepath = path.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Register (or fetch) an input product ahead of a run. Inputs must
    /// go through the store so `run` can re-supply them idempotently.
    pub async fn product(
        &self,
        data_type: &str,
        creation_dt: DateTime<Utc>,
        product_location: &str,
        flags: Option<i64>,
        data_subtype: Option<&str>,
    ) -> Result<Product> {
        self.store
            .make_or_get_product(
                data_type,
                "INPUT",
                creation_dt,
                product_location,
                flags,
                data_subtype,
            )
            .await
    }

    /// Pre-flight contract check. Each task's required config keys must
    /// resolve from configuration (with the task's own profile selected)
    /// or from a strictly earlier task's `will_set` promises; each
    /// required product type must be satisfiable from the supplied
    /// inputs or a strictly earlier task's promised outputs.
    pub fn validate(&self, inputs: &[Product]) -> Result<()> {
        let mut report = ValidationReport::default();

        // config keys
        let mut scratch = self.config.clone();
        let mut promised: BTreeSet<String> = BTreeSet::new();
        for entry in &self.entries {
            scratch.set_active_profile(None)?;
            if let Some(profile) = entry.task.config_profile() {
                scratch.set_active_profile(Some(&profile))?;
            }
            for key in entry.task.required_params() {
                if !scratch.has(&key) && !promised.contains(&key) {
                    report
                        .missing_params
                        .entry(entry.task.name().to_string())
                        .or_default()
                        .push(key);
                }
            }
            promised.extend(entry.task.will_set());
        }

        // product flow
        let mut supplied: BTreeSet<String> = inputs
            .iter()
            .flat_map(Product::satisfied_types)
            .collect();
        for entry in &self.entries {
            for dtype in entry.task.required_product_types() {
                if !supplied.contains(&dtype) {
                    report
                        .missing_product_types
                        .entry(entry.task.name().to_string())
                        .or_default()
                        .push(dtype);
                }
            }
            supplied.extend(entry.task.product_types_produced());
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(report))
        }
    }

    /// Execute the pipeline against the given inputs.
    pub async fn run(&mut self, inputs: Vec<Product>) -> Result<RunOutcome> {
        self.validate(&inputs)?;
        std::fs::create_dir_all(&self.outdir)?;

        let pipeline_start = Utc::now();
        let snapshot = self.config.snapshot_json();
        let mut run = self
            .store
            .record_pipeline_start(
                &self.name,
                &self.version,
                pipeline_start,
                &snapshot,
                Some(&self.log_filepath.to_string_lossy()),
            )
            .await?;

        let mut registered = Vec::with_capacity(inputs.len());
        for input in &inputs {
            registered.push(self.store.record_input_data(input, &run).await?);
        }

        tracing::info!("Beginning run {}", run);

        let mut succeeded: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut crashed: Vec<String> = Vec::new();
        let mut task_runs: Vec<TaskRun> = Vec::new();
        let total = self.entries.len();

        for (i, entry) in self.entries.iter_mut().enumerate() {
            let task_name = entry.task.name().to_string();
            let task_start = Utc::now();
            tracing::info!("Began task '{}' ({}/{})", task_name, i + 1, total);

            let group = match &entry.group {
                Some(name) => Some(self.store.ensure_group(run.id, name).await?),
                None => None,
            };
            let mut task_run = self
                .store
                .record_task_start(
                    &task_name,
                    task_start,
                    run.id,
                    group.as_ref().map(|g| g.id),
                )
                .await?;

            self.config.set_active_profile(None)?;
            if let Some(profile) = entry.task.config_profile() {
                self.config.set_active_profile(Some(&profile))?;
            }
            let filters = entry
                .task
                .filters()
                .merged_with(&filters_from_config(&self.config));

            let result = {
                let mut ctx = TaskContext::new(
                    &mut self.config,
                    &self.store,
                    &run,
                    &task_run,
                    group,
                    entry.policy,
                    filters,
                    &self.outdir,
                );
                entry.task.run(&mut ctx).await
            };
            let task_end = Utc::now();
            let duration = task_end - task_start;

            match result {
                Ok(code) if code == STATUS_SUCCESS => {
                    self.store
                        .record_task_end(&mut task_run, task_end, code)
                        .await?;
                    tracing::info!(
                        "Finished task '{}' ({}/{}) (duration: {}) with code {}",
                        task_name,
                        i + 1,
                        total,
                        duration,
                        code
                    );
                    audit_task_honesty(
                        &self.config,
                        &self.store,
                        &run,
                        &task_run,
                        entry.task.as_ref(),
                    )
                    .await?;
                    succeeded.push(task_name);
                    task_runs.push(task_run);
                }
                Ok(code) => {
                    self.store
                        .record_task_end(&mut task_run, task_end, code)
                        .await?;
                    tracing::error!(
                        "Got nonzero exit code from task '{}': {}! Ending pipeline run.",
                        task_name,
                        code
                    );
                    failed.push(task_name);
                    task_runs.push(task_run);
                    break;
                }
                Err(error) => {
                    self.store
                        .record_task_end(&mut task_run, task_end, STATUS_CRASHED)
                        .await?;
                    tracing::error!(
                        "Got exception while running task '{}': {:#}. Ending pipeline run.",
                        task_name,
                        error
                    );
                    crashed.push(task_name);
                    task_runs.push(task_run);
                    break;
                }
            }
        }

        self.config.set_active_profile(None)?;

        let success = failed.is_empty() && crashed.is_empty();
        let pipeline_end = Utc::now();
        let duration = pipeline_end - pipeline_start;
        if success {
            tracing::info!("Successfully finished run {} (duration: {})", run, duration);
        } else {
            tracing::error!("Unsuccessfully finished run {} (duration: {})", run, duration);
            if !failed.is_empty() {
                tracing::warn!("Failed: {}", failed.join(", "));
            }
            if !crashed.is_empty() {
                tracing::warn!("Crashed: {}", crashed.join(", "));
            }
        }
        tracing::info!("Succeeded: {:?}", succeeded);

        self.store
            .record_pipeline_end(
                &mut run,
                pipeline_end,
                success,
                failed.clone(),
                crashed.clone(),
            )
            .await?;

        Ok(RunOutcome {
            run,
            success,
            succeeded,
            failed,
            crashed,
            task_runs,
            inputs: registered,
        })
    }
}

/// Post-hoc check that a successful task kept its promises: every
/// `will_set` key now resolves, and every promised product type was
/// actually produced by the task's run. Mismatches are advisory, so they
/// warn instead of failing the run.
async fn audit_task_honesty(
    config: &Config,
    store: &PipelineStore,
    run: &PipelineRun,
    task_run: &TaskRun,
    task: &dyn Task,
) -> Result<()> {
    let missing_keys: Vec<String> = task
        .will_set()
        .into_iter()
        .filter(|key| config.get(key).is_none())
        .collect();

    let produced = provenance::related_products(
        store,
        run,
        &ProductQuery::new().producing_task_run(task_run.id),
    )
    .await?;
    let mut produced_types: BTreeSet<String> = BTreeSet::new();
    for product in &produced {
        produced_types.extend(product.satisfied_types());
    }
    let missing_types: Vec<String> = task
        .product_types_produced()
        .into_iter()
        .filter(|t| !produced_types.contains(t))
        .collect();

    if !missing_keys.is_empty() {
        tracing::warn!(
            "It looks like task '{}' (#{}) failed to set the following config keys despite \
             promising to do so: {:?}. This is probably a programming error. The pipeline run \
             will continue, but this could cause serious problems.",
            task.name(),
            task_run.id,
            missing_keys
        );
    }
    if !missing_types.is_empty() {
        tracing::warn!(
            "It looks like task '{}' (#{}) failed to produce data products of the following \
             types, despite promising to do so: {:?}. This is probably a programming error. The \
             pipeline run will continue, but this could cause serious problems.",
            task.name(),
            task_run.id,
            missing_types
        );
    }
    Ok(())
}

/// Result of one pipeline run. Failures and crashes are reported here,
/// not raised.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: PipelineRun,
    pub success: bool,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub crashed: Vec<String>,
    pub task_runs: Vec<TaskRun>,
    /// The inputs as registered in the store.
    pub inputs: Vec<Product>,
}

/// Everything `validate` found missing, keyed by task name.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub missing_params: BTreeMap<String, Vec<String>>,
    pub missing_product_types: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.missing_params.is_empty() && self.missing_product_types.is_empty()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.missing_params.is_empty() {
            writeln!(f, "tasks are missing config keys:")?;
            for (task, keys) in &self.missing_params {
                writeln!(f, "  {}: {}", task, keys.join(", "))?;
            }
        }
        if !self.missing_product_types.is_empty() {
            writeln!(f, "tasks are missing data products:")?;
            for (task, types) in &self.missing_product_types {
                writeln!(f, "  {}: {}", task, types.join(", "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::OutputSpec;
    use async_trait::async_trait;

    async fn test_pipeline(name: &str) -> Pipeline {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let outdir = std::env::temp_dir().join(format!("vega-test-{name}"));
        Pipeline::new(name, "0.1", outdir, Config::from_table(toml::Table::new()), store)
    }

    /// Produces one product of type "x" from nothing.
    struct ProduceX;

    #[async_trait]
    impl Task for ProduceX {
        fn name(&self) -> &str {
            "produce_x"
        }
        fn description(&self) -> &str {
            "makes an x"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec![]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec!["x".to_string()]
        }
        async fn run(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            ctx.publish_output(OutputSpec::new("x", "/d/x.out")).await?;
            Ok(0)
        }
    }

    /// Consumes the "x" product and derives a "y" from it.
    struct ConsumeXProduceY;

    #[async_trait]
    impl Task for ConsumeXProduceY {
        fn name(&self) -> &str {
            "produce_y"
        }
        fn description(&self) -> &str {
            "derives a y from the x"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec![]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec!["x".to_string()]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec!["y".to_string()]
        }
        async fn run(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            let xs = ctx.find_products(ProductQuery::of_type("x")).await?;
            anyhow::ensure!(xs.len() == 1, "expected exactly one x");
            ctx.publish_output(OutputSpec::new("y", "/d/y.out").precursor(&xs[0]))
                .await?;
            Ok(0)
        }
    }

    /// Fails with a fixed status code.
    struct FailWith(i32);

    #[async_trait]
    impl Task for FailWith {
        fn name(&self) -> &str {
            "fail_with"
        }
        fn description(&self) -> &str {
            "declares a failure"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec![]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec![]
        }
        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            Ok(self.0)
        }
    }

    /// Crashes outright.
    struct Crash;

    #[async_trait]
    impl Task for Crash {
        fn name(&self) -> &str {
            "crash"
        }
        fn description(&self) -> &str {
            "raises"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec![]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec![]
        }
        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            anyhow::bail!("I'm going to crash now!")
        }
    }

    /// Sets a config key for later tasks.
    struct SetShared;

    #[async_trait]
    impl Task for SetShared {
        fn name(&self) -> &str {
            "set_shared"
        }
        fn description(&self) -> &str {
            "sets SHARED_KEY"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec!["SHARED_KEY".to_string()]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec![]
        }
        async fn run(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            ctx.config_mut().set("SHARED_KEY", "from set_shared");
            Ok(0)
        }
    }

    /// Reads the key a previous task set; fails if it's missing.
    struct ReadShared;

    #[async_trait]
    impl Task for ReadShared {
        fn name(&self) -> &str {
            "read_shared"
        }
        fn description(&self) -> &str {
            "reads SHARED_KEY"
        }
        fn required_params(&self) -> Vec<String> {
            vec!["SHARED_KEY".to_string()]
        }
        fn will_set(&self) -> Vec<String> {
            vec![]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec![]
        }
        async fn run(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            match ctx.config().get("SHARED_KEY") {
                Some(_) => Ok(0),
                None => Ok(1),
            }
        }
    }

    /// Promises a key and a product type it never delivers.
    struct Liar;

    #[async_trait]
    impl Task for Liar {
        fn name(&self) -> &str {
            "liar"
        }
        fn description(&self) -> &str {
            "breaks its promises"
        }
        fn required_params(&self) -> Vec<String> {
            vec![]
        }
        fn will_set(&self) -> Vec<String> {
            vec!["NEVER_SET".to_string()]
        }
        fn required_product_types(&self) -> Vec<String> {
            vec![]
        }
        fn product_types_produced(&self) -> Vec<String> {
            vec!["ghost".to_string()]
        }
        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_validate_flags_unresolvable_config_key() {
        let pipeline = test_pipeline("validate-key").await.with_task(Box::new(ReadShared));
        let err = pipeline.validate(&[]).unwrap_err();
        match err {
            EngineError::Validation(report) => {
                assert_eq!(
                    report.missing_params.get("read_shared"),
                    Some(&vec!["SHARED_KEY".to_string()])
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validate_accepts_promised_config_key() {
        let pipeline = test_pipeline("validate-promise")
            .await
            .with_task(Box::new(SetShared))
            .with_task(Box::new(ReadShared));
        pipeline.validate(&[]).unwrap();
    }

    #[tokio::test]
    async fn test_validate_flags_missing_product_type() {
        let pipeline = test_pipeline("validate-product")
            .await
            .with_task(Box::new(ConsumeXProduceY));
        let err = pipeline.validate(&[]).unwrap_err();
        match err {
            EngineError::Validation(report) => {
                assert_eq!(
                    report.missing_product_types.get("produce_y"),
                    Some(&vec!["x".to_string()])
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validate_accepts_product_from_earlier_task() {
        let pipeline = test_pipeline("validate-flow")
            .await
            .with_task(Box::new(ProduceX))
            .with_task(Box::new(ConsumeXProduceY));
        pipeline.validate(&[]).unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_two_task_run() {
        let mut pipeline = test_pipeline("end-to-end")
            .await
            .with_task(Box::new(ProduceX))
            .with_task(Box::new(ConsumeXProduceY));

        let outcome = pipeline.run(vec![]).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.succeeded, vec!["produce_x", "produce_y"]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.crashed.is_empty());
        assert_eq!(outcome.run.success, Some(true));
        assert!(outcome.run.end_time_utc.is_some());

        // simulate a third task looking for the y
        let store = pipeline.store();
        let task_c = store
            .record_task_start("inspect", Utc::now(), outcome.run.id, None)
            .await
            .unwrap();
        let mut config = Config::from_table(toml::Table::new());
        let ctx = TaskContext::new(
            &mut config,
            store,
            &outcome.run,
            &task_c,
            None,
            GroupPolicy::Ignore,
            ProductQuery::new(),
            Path::new("/tmp/out"),
        );
        let ys = ctx.find_products(ProductQuery::of_type("y")).await.unwrap();
        assert_eq!(ys.len(), 1);

        let precursors = store.precursors(ys[0].id).await.unwrap();
        assert_eq!(precursors.len(), 1);
        assert_eq!(precursors[0].data_type, "x");
        assert_eq!(precursors[0].task_name, "produce_x");
    }

    #[tokio::test]
    async fn test_nonzero_status_halts_pipeline() {
        let mut pipeline = test_pipeline("halt-on-failure")
            .await
            .with_task(Box::new(ProduceX))
            .with_task(Box::new(FailWith(3)))
            .with_task(Box::new(ConsumeXProduceY));

        let outcome = pipeline.run(vec![]).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failed, vec!["fail_with"]);
        assert!(outcome.crashed.is_empty());
        assert_eq!(outcome.succeeded, vec!["produce_x"]);
        assert_eq!(outcome.run.failed_tasks, vec!["fail_with"]);

        // no task run record exists for the task after the failure
        let task_runs = pipeline
            .store()
            .task_runs_for(outcome.run.id)
            .await
            .unwrap();
        assert_eq!(task_runs.len(), 2);
        assert_eq!(task_runs[1].status_code, Some(3));
    }

    #[tokio::test]
    async fn test_crash_halts_pipeline_with_sentinel() {
        let mut pipeline = test_pipeline("halt-on-crash")
            .await
            .with_task(Box::new(Crash))
            .with_task(Box::new(ProduceX));

        let outcome = pipeline.run(vec![]).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.crashed, vec!["crash"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.run.crashed_tasks, vec!["crash"]);

        let task_runs = pipeline
            .store()
            .task_runs_for(outcome.run.id)
            .await
            .unwrap();
        assert_eq!(task_runs.len(), 1);
        assert_eq!(task_runs[0].status_code, Some(STATUS_CRASHED));
        assert!(task_runs[0].crashed());
    }

    #[tokio::test]
    async fn test_config_writes_flow_between_tasks() {
        let mut pipeline = test_pipeline("shared-config")
            .await
            .with_task(Box::new(SetShared))
            .with_task(Box::new(ReadShared));

        let outcome = pipeline.run(vec![]).await.unwrap();
        assert!(outcome.success, "ReadShared saw SHARED_KEY set by SetShared");
        // the write landed in the base document and survives the run
        assert!(pipeline.config().has("SHARED_KEY"));
    }

    #[tokio::test]
    async fn test_honesty_audit_is_advisory() {
        let mut pipeline = test_pipeline("honesty").await.with_task(Box::new(Liar));
        let outcome = pipeline.run(vec![]).await.unwrap();
        // broken promises warn but never fail the run
        assert!(outcome.success);
        assert_eq!(outcome.succeeded, vec!["liar"]);
    }

    #[tokio::test]
    async fn test_run_registers_inputs_idempotently() {
        let mut pipeline = test_pipeline("inputs").await.with_task(Box::new(ProduceX));
        let input = pipeline
            .product("raw", Utc::now(), "/d/raw.fits", None, None)
            .await
            .unwrap();
        // supplying the same product twice registers it once
        let outcome = pipeline.run(vec![input.clone(), input]).await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            pipeline
                .store()
                .inputs_for_run(outcome.run.id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(outcome.inputs[0].producing_pipeline_run_id, Some(outcome.run.id));
    }

    #[tokio::test]
    async fn test_validate_uses_task_config_profile() {
        struct NeedsProfiledKey;

        #[async_trait]
        impl Task for NeedsProfiledKey {
            fn name(&self) -> &str {
                "needs_profiled_key"
            }
            fn description(&self) -> &str {
                "requires a key that only exists in a profile"
            }
            fn required_params(&self) -> Vec<String> {
                vec!["DEPTH".to_string()]
            }
            fn will_set(&self) -> Vec<String> {
                vec![]
            }
            fn required_product_types(&self) -> Vec<String> {
                vec![]
            }
            fn product_types_produced(&self) -> Vec<String> {
                vec![]
            }
            fn config_profile(&self) -> Option<String> {
                Some("Deep".to_string())
            }
            async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> anyhow::Result<i32> {
                Ok(0)
            }
        }

        let table = r#"
            [Deep]
            DEPTH = 30
        "#
        .parse::<toml::Table>()
        .unwrap();
        let store = PipelineStore::open_in_memory().await.unwrap();
        let outdir = std::env::temp_dir().join("vega-test-profile");
        let pipeline = Pipeline::new("profiled", "0.1", outdir, Config::from_table(table), store)
            .with_task(Box::new(NeedsProfiledKey));

        pipeline.validate(&[]).unwrap();
    }
}
