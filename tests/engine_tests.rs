//! Record-level behavior of the in-memory engine: key handling,
//! auto-increment, ranges, and index maintenance.

mod common;

use common::open_pair;
use evostore::prelude::*;
use serde_json::{Value, json};

async fn open_with(db: &Database, schema: &SchemaBuilder) -> Transaction<(), Value> {
    db.open(schema).await.unwrap();
    // A passthrough seed; real steps are piped on per test.
    db.transaction(
        &["items"],
        TransactionMode::ReadWrite,
        task_fn(|_: (), _ctx| async move { Ok(Value::Null) }),
    )
}

fn inline_schema(auto_increment: bool) -> SchemaBuilder {
    SchemaBuilder::new()
        .define(1)
        .unwrap()
        .add_store(
            "items",
            AddStoreOptions::builder()
                .key_path("id")
                .auto_increment(auto_increment)
                .build(),
        )
        .unwrap()
}

fn out_of_line_schema() -> SchemaBuilder {
    SchemaBuilder::new()
        .define(1)
        .unwrap()
        .add_store("items", AddStoreOptions::default())
        .unwrap()
}

#[tokio::test]
async fn auto_increment_generates_and_writes_back_keys() {
    let (_engine, db) = open_pair("auto_inc");
    let txn = open_with(&db, &inline_schema(true)).await.pipe(task_fn(
        |_: Value, ctx| async move {
            let items = ctx.trx.store("items")?;

            let first = items.put(json!({ "label": "no key" })).await?;
            assert_eq!(first, Key::Integer(1));

            // An explicit key advances the generator past itself.
            items.put(json!({ "id": 10, "label": "explicit" })).await?;
            let next = items.put(json!({ "label": "generated" })).await?;
            assert_eq!(next, Key::Integer(11));

            // The generated key was written into the record.
            let record = items.get(&Key::Integer(11)).await?.ok_or_else(|| {
                EvoError::task_msg("record missing")
            })?;
            assert_eq!(record.get("id"), Some(&json!(11)));
            Ok(Value::Null)
        },
    ));
    txn.execute(()).await.unwrap();
}

#[tokio::test]
async fn inline_stores_without_auto_increment_require_a_key_field() {
    let (_engine, db) = open_pair("inline_strict");
    let txn = open_with(&db, &inline_schema(false)).await.pipe(task_fn(
        |_: Value, ctx| async move {
            let items = ctx.trx.store("items")?;
            let err = items.put(json!({ "label": "keyless" })).await.unwrap_err();
            assert!(matches!(err, EvoError::Engine(EngineError::DataError(_))));
            Ok(Value::Null)
        },
    ));
    // The failed put was recorded on the transaction, so the execution
    // as a whole reports the engine error.
    let err = txn.execute(()).await.unwrap_err();
    assert!(matches!(err, EvoError::Engine(EngineError::DataError(_))));
}

#[tokio::test]
async fn out_of_line_keys_come_from_the_caller() {
    let (_engine, db) = open_pair("out_of_line");
    let txn = open_with(&db, &out_of_line_schema()).await.pipe(task_fn(
        |_: Value, ctx| async move {
            let items = ctx.trx.store("items")?;

            items
                .put_with_key(Key::from("b"), json!({ "label": "second" }))
                .await?;
            items
                .put_with_key(Key::from("a"), json!({ "label": "first" }))
                .await?;

            // Plain put has no key to use.
            let err = items.put(json!({ "label": "bare" })).await.unwrap_err();
            assert!(matches!(err, EvoError::Engine(EngineError::DataError(_))));

            // Cursor order is key order, not insertion order.
            let mut cursor = items.open_cursor(None).await?;
            let mut labels = Vec::new();
            while let Some((_, record)) = cursor.next().await? {
                labels.push(record.get("label").cloned());
            }
            assert_eq!(labels, vec![Some(json!("first")), Some(json!("second"))]);
            Ok(Value::Null)
        },
    ));
    // The deliberate bare put above leaves a recorded engine error.
    let err = txn.execute(()).await.unwrap_err();
    assert!(matches!(err, EvoError::Engine(EngineError::DataError(_))));
}

#[tokio::test]
async fn counts_respect_key_ranges() {
    let (_engine, db) = open_pair("ranges");
    let txn = open_with(&db, &inline_schema(false)).await.pipe(task_fn(
        |_: Value, ctx| async move {
            let items = ctx.trx.store("items")?;
            for id in [1, 3, 5, 7] {
                items.put(json!({ "id": id })).await?;
            }

            assert_eq!(items.count(None).await?, 4);
            assert_eq!(items.count(Some(&ctx.range.only(3))).await?, 1);
            assert_eq!(
                items.count(Some(&ctx.range.lower_bound(3, true))).await?,
                2
            );
            assert_eq!(
                items
                    .count(Some(&ctx.range.bound(1, 5, true, false)))
                    .await?,
                2
            );
            Ok(Value::Null)
        },
    ));
    txn.execute(()).await.unwrap();
}

#[tokio::test]
async fn replacing_a_record_updates_index_entries() {
    let (_engine, db) = open_pair("replace");

    let schema = inline_schema(false)
        .add_index(
            "by_code",
            "code",
            AddIndexOptions::builder().unique(true).build(),
        )
        .unwrap();

    let txn = open_with(&db, &schema).await.pipe(task_fn(|_: Value, ctx| async move {
        let items = ctx.trx.store("items")?;
        items.put(json!({ "id": 1, "code": "old" })).await?;
        // Replacing record 1 frees "old" for someone else.
        items.put(json!({ "id": 1, "code": "new" })).await?;
        items.put(json!({ "id": 2, "code": "old" })).await?;

        // But "new" is now taken by record 1.
        let err = items
            .put(json!({ "id": 3, "code": "new" }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvoError::Engine(EngineError::ConstraintViolation { .. })
        ));
        Ok(Value::Null)
    }));
    let err = txn.execute(()).await.unwrap_err();
    assert!(matches!(
        err,
        EvoError::Engine(EngineError::ConstraintViolation { .. })
    ));
}

#[tokio::test]
async fn multi_entry_indexes_fan_out_array_fields() {
    let (_engine, db) = open_pair("multi_entry");

    let schema = inline_schema(false)
        .add_index(
            "by_tag",
            "tags",
            AddIndexOptions::builder().unique(true).multi_entry(true).build(),
        )
        .unwrap();

    let txn = open_with(&db, &schema).await.pipe(task_fn(|_: Value, ctx| async move {
        let items = ctx.trx.store("items")?;
        items
            .put(json!({ "id": 1, "tags": ["alpha", "beta"] }))
            .await?;

        // "beta" already belongs to record 1 through the fan-out.
        let err = items
            .put(json!({ "id": 2, "tags": ["beta"] }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvoError::Engine(EngineError::ConstraintViolation { .. })
        ));

        // Disjoint tags are fine.
        items
            .put(json!({ "id": 3, "tags": ["gamma"] }))
            .await?;
        Ok(Value::Null)
    }));
    let err = txn.execute(()).await.unwrap_err();
    assert!(matches!(
        err,
        EvoError::Engine(EngineError::ConstraintViolation { .. })
    ));
}

#[tokio::test]
async fn indexes_created_later_backfill_existing_records() {
    let (engine, db) = open_pair("backfill");
    db.open(&inline_schema(false)).await.unwrap();

    db.transaction(
        &["items"],
        TransactionMode::ReadWrite,
        task_fn(|_: (), ctx| async move {
            let items = ctx.trx.store("items")?;
            items.put(json!({ "id": 1, "code": "dup" })).await?;
            items.put(json!({ "id": 2, "code": "dup" })).await?;
            Ok(())
        }),
    )
    .execute(())
    .await
    .unwrap();
    db.close();

    // A unique index over colliding data must refuse to build, and the
    // failed upgrade must not bump the version.
    let schema = inline_schema(false)
        .define(2)
        .unwrap()
        .get_store("items")
        .unwrap()
        .add_index(
            "by_code",
            "code",
            AddIndexOptions::builder().unique(true).build(),
        )
        .unwrap();

    let db = Database::new("backfill", engine.clone());
    let err = db.open(&schema).await.unwrap_err();
    assert!(matches!(
        err,
        EvoError::Engine(EngineError::ConstraintViolation { .. })
    ));

    let db = Database::new("backfill", engine);
    db.open(&inline_schema(false)).await.unwrap();
    assert_eq!(db.version(), Some(1));
}
