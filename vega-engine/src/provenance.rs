//! Provenance graph algorithms
//!
//! Lineage walks over the precursor/derivative relation and the filtered
//! product queries tasks use to find their inputs. All functions operate
//! on a [`PipelineStore`]; nothing here caches graph state between calls,
//! so results always reflect the latest committed rows.

use std::future::Future;
use std::pin::Pin;

use sqlx::QueryBuilder;
use sqlx::Sqlite;
use vega_core::domain::product::Product;
use vega_core::domain::run::PipelineRun;
use vega_core::query::ProductQuery;
use vega_core::traverse::{TraversalNode, flatten_forest};

use crate::error::Result;
use crate::repository::products::ProductRow;
use crate::repository::{groups, products};
use crate::store::PipelineStore;

/// Product columns qualified for queries that join other tables.
const QUALIFIED_PRODUCT_COLUMNS: &str = "p.id, p.data_type, p.data_subtype, p.task_name, \
     p.product_location, p.creation_dt, p.is_input, p.flags, \
     p.producing_pipeline_run_id, p.producing_task_run_id";

/// Walk the derivative relation from `product`, applying `visit` to every
/// reachable node and returning the visit results as a tree.
///
/// `max_depth` bounds the walk; any negative value is unbounded and zero
/// visits nothing. With `run`, only derivatives produced by that run are
/// entered. A node already on the current path is not re-entered, so a
/// cycle introduced by misuse terminates instead of recursing forever;
/// nodes reachable along several distinct paths are visited once per
/// path.
pub async fn traverse_derivatives<T, F>(
    store: &PipelineStore,
    product: &Product,
    visit: &mut F,
    max_depth: i32,
    run: Option<&PipelineRun>,
) -> Result<Vec<TraversalNode<T>>>
where
    F: FnMut(&Product) -> T + Send,
    T: Send,
{
    let mut path = vec![product.id];
    walk(
        store,
        product.id,
        visit,
        max_depth,
        run.map(|r| r.id),
        &mut path,
        Direction::Derivatives,
    )
    .await
}

/// Walk the precursor relation from `product`. Mirror of
/// [`traverse_derivatives`]; with `run`, only precursors produced by the
/// run or consumed by it as input are entered.
pub async fn traverse_precursors<T, F>(
    store: &PipelineStore,
    product: &Product,
    visit: &mut F,
    max_depth: i32,
    run: Option<&PipelineRun>,
) -> Result<Vec<TraversalNode<T>>>
where
    F: FnMut(&Product) -> T + Send,
    T: Send,
{
    let mut path = vec![product.id];
    walk(
        store,
        product.id,
        visit,
        max_depth,
        run.map(|r| r.id),
        &mut path,
        Direction::Precursors,
    )
    .await
}

/// Every product reachable through derivative edges, flattened and
/// deduplicated. Never contains `product` itself.
pub async fn all_derivatives(
    store: &PipelineStore,
    product: &Product,
    run: Option<&PipelineRun>,
) -> Result<Vec<Product>> {
    let forest = traverse_derivatives(store, product, &mut Product::clone, -1, run).await?;
    Ok(dedup_flattened(&forest, product.id))
}

/// Every product reachable through precursor edges, flattened and
/// deduplicated. Never contains `product` itself.
pub async fn all_precursors(
    store: &PipelineStore,
    product: &Product,
    run: Option<&PipelineRun>,
) -> Result<Vec<Product>> {
    let forest = traverse_precursors(store, product, &mut Product::clone, -1, run).await?;
    Ok(dedup_flattened(&forest, product.id))
}

fn dedup_flattened(forest: &[TraversalNode<Product>], root_id: i64) -> Vec<Product> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for node in flatten_forest(forest) {
        if node.product_id != root_id && seen.insert(node.product_id) {
            out.push(node.value.clone());
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Direction {
    Derivatives,
    Precursors,
}

fn walk<'a, T, F>(
    store: &'a PipelineStore,
    product_id: i64,
    visit: &'a mut F,
    depth: i32,
    run_id: Option<i64>,
    path: &'a mut Vec<i64>,
    direction: Direction,
) -> Pin<Box<dyn Future<Output = Result<Vec<TraversalNode<T>>>> + Send + 'a>>
where
    F: FnMut(&Product) -> T + Send,
    T: Send,
{
    Box::pin(async move {
        let mut nodes = Vec::new();
        if depth == 0 {
            return Ok(nodes);
        }

        let neighbors = match direction {
            Direction::Derivatives => products::derivatives_of(store.pool(), product_id).await?,
            Direction::Precursors => products::precursors_of(store.pool(), product_id).await?,
        };

        for neighbor in neighbors {
            if let Some(run_id) = run_id
                && !in_run_scope(store, &neighbor, run_id, direction).await?
            {
                continue;
            }
            if path.contains(&neighbor.id) {
                continue;
            }

            let value = visit(&neighbor);
            path.push(neighbor.id);
            let children = walk(
                store,
                neighbor.id,
                &mut *visit,
                depth - 1,
                run_id,
                &mut *path,
                direction,
            )
            .await?;
            path.pop();

            nodes.push(TraversalNode {
                product_id: neighbor.id,
                value,
                children,
            });
        }
        Ok(nodes)
    })
}

async fn in_run_scope(
    store: &PipelineStore,
    product: &Product,
    run_id: i64,
    direction: Direction,
) -> Result<bool> {
    if product.producing_pipeline_run_id == Some(run_id) {
        return Ok(true);
    }
    // the precursor walk also admits the run's registered inputs
    match direction {
        Direction::Derivatives => Ok(false),
        Direction::Precursors => {
            Ok(products::is_input_of_run(store.pool(), product.id, run_id).await?)
        }
    }
}

// =============================================================================
// Filtered product queries
// =============================================================================

/// Products that are inputs to, or were produced during, `run`, newest
/// first. Unless the query opts into superseded rows, products
/// superseded by any product produced within the same run are excluded.
pub async fn related_products(
    store: &PipelineStore,
    run: &PipelineRun,
    query: &ProductQuery,
) -> Result<Vec<Product>> {
    let mut builder = select_products();
    builder.push(" WHERE (p.producing_pipeline_run_id = ");
    builder.push_bind(run.id);
    builder.push(
        " OR p.id IN (SELECT product_id FROM pipeline_input_associations WHERE pipeline_run_id = ",
    );
    builder.push_bind(run.id);
    builder.push("))");

    apply_filters(&mut builder, query);
    if !query.use_superseded {
        exclude_superseded(&mut builder, run.id);
    }
    order_newest_first(&mut builder);

    fetch_products(store, builder).await
}

/// Products produced during `run` by task runs bound to the given group,
/// newest first. The same column/metadata filters and supersession
/// visibility as [`related_products`] apply.
pub async fn group_products(
    store: &PipelineStore,
    group_id: i64,
    query: &ProductQuery,
) -> Result<Vec<Product>> {
    let group = groups::find_group(store.pool(), group_id).await?;

    let mut builder = select_products();
    builder.push(
        " JOIN task_runs tr ON tr.id = p.producing_task_run_id WHERE tr.product_group_id = ",
    );
    builder.push_bind(group_id);

    apply_filters(&mut builder, query);
    if !query.use_superseded
        && let Some(run_id) = group.and_then(|g| g.pipeline_run_id)
    {
        exclude_superseded(&mut builder, run_id);
    }
    order_newest_first(&mut builder);

    fetch_products(store, builder).await
}

/// [`related_products`], minus products produced by a task bound to a
/// *different* group of the same run. Backs the `AvoidOthers` group
/// policy.
pub async fn related_products_avoiding_groups(
    store: &PipelineStore,
    run: &PipelineRun,
    group_id: i64,
    query: &ProductQuery,
) -> Result<Vec<Product>> {
    let mut builder = select_products();
    builder.push(" WHERE (p.producing_pipeline_run_id = ");
    builder.push_bind(run.id);
    builder.push(
        " OR p.id IN (SELECT product_id FROM pipeline_input_associations WHERE pipeline_run_id = ",
    );
    builder.push_bind(run.id);
    builder.push("))");

    builder.push(
        " AND NOT EXISTS (SELECT 1 FROM task_runs tr WHERE tr.id = p.producing_task_run_id AND tr.pipeline_run_id = ",
    );
    builder.push_bind(run.id);
    builder.push(" AND tr.product_group_id IS NOT NULL AND tr.product_group_id != ");
    builder.push_bind(group_id);
    builder.push(")");

    apply_filters(&mut builder, query);
    if !query.use_superseded {
        exclude_superseded(&mut builder, run.id);
    }
    order_newest_first(&mut builder);

    fetch_products(store, builder).await
}

fn select_products() -> QueryBuilder<'static, Sqlite> {
    QueryBuilder::new(format!(
        "SELECT {QUALIFIED_PRODUCT_COLUMNS} FROM products p"
    ))
}

fn apply_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ProductQuery) {
    // string predicates are LIKE so '%' wildcards work
    if let Some(pattern) = &query.data_type {
        builder.push(" AND p.data_type LIKE ");
        builder.push_bind(pattern.clone());
    }
    if let Some(pattern) = &query.data_subtype {
        builder.push(" AND p.data_subtype LIKE ");
        builder.push_bind(pattern.clone());
    }
    if let Some(pattern) = &query.task_name {
        builder.push(" AND p.task_name LIKE ");
        builder.push_bind(pattern.clone());
    }
    if let Some(pattern) = &query.product_location {
        builder.push(" AND p.product_location LIKE ");
        builder.push_bind(pattern.clone());
    }
    if let Some(flags) = query.flags {
        builder.push(" AND p.flags = ");
        builder.push_bind(flags);
    }
    if let Some(is_input) = query.is_input {
        builder.push(" AND p.is_input = ");
        builder.push_bind(is_input);
    }
    if let Some(task_run_id) = query.producing_task_run_id {
        builder.push(" AND p.producing_task_run_id = ");
        builder.push_bind(task_run_id);
    }

    // one EXISTS per required metadata pair: logical AND
    for (key, value) in &query.metadata {
        builder.push(
            " AND EXISTS (SELECT 1 FROM product_metadata_associations pma \
             JOIN metadata m ON m.id = pma.metadata_id \
             WHERE pma.product_id = p.id AND m.key = ",
        );
        builder.push_bind(key.clone());
        builder.push(" AND m.value = ");
        builder.push_bind(value.clone());
        builder.push(")");
    }
}

/// Hide products superseded by any product produced within `run_id`.
fn exclude_superseded(builder: &mut QueryBuilder<'_, Sqlite>, run_id: i64) {
    builder.push(
        " AND p.id NOT IN (SELECT sa.superseded_id FROM supersessor_associations sa \
         JOIN products sup ON sup.id = sa.supersessor_id \
         WHERE sup.producing_pipeline_run_id = ",
    );
    builder.push_bind(run_id);
    builder.push(")");
}

fn order_newest_first(builder: &mut QueryBuilder<'_, Sqlite>) {
    builder.push(" ORDER BY p.creation_dt DESC, p.id DESC");
}

async fn fetch_products(
    store: &PipelineStore,
    mut builder: QueryBuilder<'_, Sqlite>,
) -> Result<Vec<Product>> {
    let rows = builder
        .build_query_as::<ProductRow>()
        .fetch_all(store.pool())
        .await?;
    Ok(rows.into_iter().map(ProductRow::into_product).collect())
}
