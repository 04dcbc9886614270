//! Migration execution engine.
//!
//! [`UpgradeProcedure`] is the compiled form of a
//! [`SchemaBuilder`](crate::schema::SchemaBuilder): the upgrade hook
//! the engine invokes exactly once per physical upgrade. It walks the
//! version numbers strictly in increasing order — versions with no
//! declared block are skipped with no work — and for each block runs
//! six stages in a fixed sequence, every stage a parallel group that
//! fully settles before the next begins:
//!
//! 1. create stores
//! 2. create indexes
//! 3. delete indexes
//! 4. delete stores — when the block registers custom tasks, each
//!    doomed store is first read through a forward cursor so its
//!    records survive as lost data; without custom tasks the store is
//!    dropped without any scan
//! 5. bundle lost data per dropped store
//! 6. run the block's custom migration tasks against the bundle
//!
//! Custom tasks therefore always observe the final post-structural
//! shape of the database for their version, plus whatever the dropped
//! stores held.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, trace};

use crate::engine::{TransactionHandle, UpgradeHook};
use crate::error::EvoResult;
use crate::key::{Record, TaskValue};
use crate::pipeline::{ArcTask, Pipeline, TaskContext, parallel, shared_task, task_fn};
use crate::schema::{IndexDescription, StoreDescription, VersionInfo};

/// Records captured from dropped stores, keyed by store name. Values
/// preserve cursor (key) order.
pub type LostDataBundle = BTreeMap<String, Vec<Record>>;

/// Input to a custom migration task. `None` means no store was dropped
/// in the task's version block — distinct from "a store was dropped
/// and happened to be empty".
pub type LostData = Option<Arc<LostDataBundle>>;

/// A caller-defined migration step.
pub type MigrateTask = ArcTask<LostData, TaskValue>;

/// Adapt an async closure into a [`MigrateTask`].
///
/// # Example
///
/// ```ignore
/// use evostore::migration::migrate_task;
/// use serde_json::{Value, json};
///
/// let seed = migrate_task(|_lost, ctx| async move {
///     let store = ctx.trx.store("users")?;
///     store.put(json!({ "id": 1, "name": "amara" })).await?;
///     Ok(Value::Null)
/// });
/// ```
pub fn migrate_task<F, Fut>(f: F) -> MigrateTask
where
    F: Fn(LostData, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EvoResult<TaskValue>> + Send + 'static,
{
    shared_task(f)
}

/// The compiled upgrade procedure for one schema lineage.
///
/// Holds a snapshot of the builder's version map taken at
/// [`build`](crate::schema::SchemaBuilder::build) time, so later
/// mutations of the builder do not affect an open already in flight.
#[derive(Clone)]
pub struct UpgradeProcedure {
    versions: BTreeMap<u32, VersionInfo>,
}

impl UpgradeProcedure {
    pub(crate) fn new(versions: BTreeMap<u32, VersionInfo>) -> Self {
        Self { versions }
    }
}

#[async_trait]
impl UpgradeHook for UpgradeProcedure {
    async fn upgrade(
        &self,
        old_version: u32,
        new_version: u32,
        trx: Arc<dyn TransactionHandle>,
    ) -> EvoResult<()> {
        let ctx = TaskContext::new(trx);
        let start = if old_version == 0 { 1 } else { old_version + 1 };

        for version in start..=new_version {
            let Some(block) = self.versions.get(&version) else {
                trace!("upgrade: no block for v{version}, skipping");
                continue;
            };
            debug!(
                "upgrade: running block v{version} ({} stores, {} drops, {} tasks)",
                block.stores.len(),
                block.drop_stores.len(),
                block.tasks.len()
            );
            run_block(block, &ctx).await?;
        }
        Ok(())
    }
}

/// Run the six stages of one version block to completion.
async fn run_block(block: &VersionInfo, ctx: &TaskContext) -> EvoResult<()> {
    // Capturing a doomed store's records costs a full scan; skip it
    // when no custom task will ever read the bundle.
    let backup = !block.tasks.is_empty();

    let create_stores: Vec<ArcTask<(), ()>> = block
        .stores
        .iter()
        .cloned()
        .map(create_store_task)
        .collect();
    let create_indexes: Vec<ArcTask<Vec<()>, ()>> = block
        .indexes
        .iter()
        .cloned()
        .map(create_index_task)
        .collect();
    let drop_indexes: Vec<ArcTask<Vec<()>, ()>> = block
        .drop_indexes
        .iter()
        .cloned()
        .map(delete_index_task)
        .collect();
    let drop_stores: Vec<ArcTask<Vec<()>, (String, Vec<Record>)>> = block
        .drop_stores
        .iter()
        .cloned()
        .map(|desc| delete_store_task(desc, backup))
        .collect();
    let migraters = block.tasks.clone();

    Pipeline::from_task(parallel(create_stores))
        .pipe(parallel(create_indexes))
        .pipe(parallel(drop_indexes))
        .pipe(parallel(drop_stores))
        .pipe(task_fn(bundle_lost_data))
        .pipe(parallel(migraters))
        .run((), ctx)
        .await
        .map(|_| ())
}

fn create_store_task(desc: StoreDescription) -> ArcTask<(), ()> {
    shared_task(move |_: (), ctx: TaskContext| {
        let desc = desc.clone();
        async move {
            trace!("upgrade: create store '{}'", desc.name);
            ctx.trx.create_store(&desc).await
        }
    })
}

fn create_index_task(desc: IndexDescription) -> ArcTask<Vec<()>, ()> {
    shared_task(move |_: Vec<()>, ctx: TaskContext| {
        let desc = desc.clone();
        async move {
            trace!("upgrade: create index '{}' on '{}'", desc.name, desc.store_name);
            let store = ctx.trx.store(&desc.store_name)?;
            store.create_index(&desc).await
        }
    })
}

fn delete_index_task(desc: IndexDescription) -> ArcTask<Vec<()>, ()> {
    shared_task(move |_: Vec<()>, ctx: TaskContext| {
        let desc = desc.clone();
        async move {
            trace!("upgrade: delete index '{}' on '{}'", desc.name, desc.store_name);
            let store = ctx.trx.store(&desc.store_name)?;
            store.delete_index(&desc.name).await
        }
    })
}

/// Drop one store, optionally capturing its records first.
fn delete_store_task(desc: StoreDescription, backup: bool) -> ArcTask<Vec<()>, (String, Vec<Record>)> {
    shared_task(move |_: Vec<()>, ctx: TaskContext| {
        let name = desc.name.clone();
        async move {
            if !backup {
                trace!("upgrade: delete store '{name}' (no capture)");
                ctx.trx.delete_store(&name).await?;
                return Ok((name, Vec::new()));
            }

            trace!("upgrade: delete store '{name}' (capturing records)");
            let store = ctx.trx.store(&name)?;
            let mut cursor = store.open_cursor(None).await?;
            let mut records = Vec::new();
            while let Some((_, record)) = cursor.next().await? {
                records.push(record);
            }
            ctx.trx.delete_store(&name).await?;
            Ok((name, records))
        }
    })
}

/// Merge the per-store capture results into one bundle. No drops this
/// version means no bundle at all.
async fn bundle_lost_data(
    captured: Vec<(String, Vec<Record>)>,
    _ctx: TaskContext,
) -> EvoResult<LostData> {
    if captured.is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(captured.into_iter().collect())))
}
