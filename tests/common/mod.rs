// Common test utilities and helpers
#![allow(dead_code)]

use std::sync::Arc;

use evostore::prelude::*;
use serde_json::{Value, json};

/// Initialize logging once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh engine plus a database bound to it.
pub fn open_pair(name: &str) -> (Arc<MemoryEngine>, Database) {
    init_logger();
    let engine = Arc::new(MemoryEngine::new());
    let db = Database::new(name, engine.clone());
    (engine, db)
}

/// A task context over a read-write transaction on a one-store
/// database, for driving pipelines directly.
pub async fn pipeline_ctx(name: &str) -> TaskContext {
    let (_engine, db) = open_pair(name);
    let schema = SchemaBuilder::new()
        .define(1)
        .unwrap()
        .add_store(
            "items",
            AddStoreOptions::builder().key_path("id").build(),
        )
        .unwrap();
    db.open(&schema).await.unwrap();
    let handle = db.ready().await.unwrap();
    let trx = handle
        .transaction(&["items".to_owned()], TransactionMode::ReadWrite)
        .unwrap();
    TaskContext::new(trx)
}

/// Sample user record.
pub fn user(id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("user-{id}"),
        "email": format!("user-{id}@example.com"),
    })
}

/// Migration task that stores one record.
pub fn add_record(store: &'static str, record: Value) -> MigrateTask {
    migrate_task(move |_lost, ctx| {
        let record = record.clone();
        async move {
            let store = ctx.trx.store(store)?;
            store.put(record).await?;
            Ok(Value::Null)
        }
    })
}

/// Migration task asserting the lost-data bundle holds exactly
/// `expected` records for `store`.
pub fn verify_lost(store: &'static str, expected: usize) -> MigrateTask {
    migrate_task(move |lost: LostData, _ctx| async move {
        let bundle = lost.ok_or_else(|| EvoError::task_msg("expected a lost-data bundle"))?;
        let records = bundle
            .get(store)
            .ok_or_else(|| EvoError::task_msg(format!("no lost data for '{store}'")))?;
        if records.len() != expected {
            return Err(EvoError::task_msg(format!(
                "expected {expected} lost records for '{store}', got {}",
                records.len()
            )));
        }
        Ok(Value::Null)
    })
}

/// Count the records of one store.
pub fn count_task(store: &'static str) -> impl Task<(), u64> {
    task_fn(move |_: (), ctx| async move { ctx.trx.store(store)?.count(None).await })
}

/// Index names of one store.
pub fn index_names_task(store: &'static str) -> impl Task<(), Vec<String>> {
    task_fn(move |_: (), ctx| async move { Ok(ctx.trx.store(store)?.index_names()) })
}

/// Version 1: a `users` store with two indexes and two seed records.
pub fn schema_v1() -> SchemaBuilder {
    SchemaBuilder::new()
        .define(1)
        .unwrap()
        .add_store(
            "users",
            AddStoreOptions::builder()
                .key_path("id")
                .auto_increment(true)
                .build(),
        )
        .unwrap()
        .add_index("by_name", "name", AddIndexOptions::default())
        .unwrap()
        .add_index("by_email", "email", AddIndexOptions::default())
        .unwrap()
        .add_migrate_task(add_record("users", user(1)))
        .add_migrate_task(add_record("users", user(2)))
}

/// Version 2: drop `by_email`, add a `posts` store with one index.
pub fn schema_v2() -> SchemaBuilder {
    schema_v1()
        .define(2)
        .unwrap()
        .get_store("users")
        .unwrap()
        .del_index("by_email")
        .unwrap()
        .add_store("posts", AddStoreOptions::default())
        .unwrap()
        .add_index("by_author", "author", AddIndexOptions::default())
        .unwrap()
}

/// Version 3: drop the `users` store.
pub fn schema_v3() -> SchemaBuilder {
    schema_v2().define(3).unwrap().del_store("users").unwrap()
}
