//! End-to-end migration runs against the in-memory engine.

mod common;

use common::{
    add_record, count_task, index_names_task, open_pair, schema_v1, schema_v2, schema_v3, user,
    verify_lost,
};
use evostore::prelude::*;
use serde_json::Value;

#[tokio::test]
async fn opening_v1_creates_stores_indexes_and_seed_records() {
    let (_engine, db) = open_pair("v1_db");
    db.open(&schema_v1()).await.unwrap();

    assert_eq!(db.version(), Some(1));
    assert_eq!(db.store_names(), vec!["users".to_owned()]);

    let indexes = db
        .transaction(&["users"], TransactionMode::ReadOnly, index_names_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(indexes, vec!["by_email".to_owned(), "by_name".to_owned()]);

    let count = db
        .transaction(&["users"], TransactionMode::ReadOnly, count_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn upgrading_to_v2_drops_an_index_and_adds_a_store() {
    let (engine, db) = open_pair("v2_db");
    db.open(&schema_v1()).await.unwrap();
    db.close();

    let db = Database::new("v2_db", engine);
    db.open(&schema_v2()).await.unwrap();

    assert_eq!(db.version(), Some(2));
    assert_eq!(
        db.store_names(),
        vec!["posts".to_owned(), "users".to_owned()]
    );

    let user_indexes = db
        .transaction(&["users"], TransactionMode::ReadOnly, index_names_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(user_indexes, vec!["by_name".to_owned()]);

    let post_indexes = db
        .transaction(&["posts"], TransactionMode::ReadOnly, index_names_task("posts"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(post_indexes, vec!["by_author".to_owned()]);

    // Seed records from v1 survived the upgrade.
    let count = db
        .transaction(&["users"], TransactionMode::ReadOnly, count_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn upgrading_to_v3_hands_dropped_records_to_the_migration_task() {
    let (engine, db) = open_pair("v3_db");
    db.open(&schema_v2()).await.unwrap();
    db.close();

    let schema = schema_v3().add_migrate_task(verify_lost("users", 2));
    let db = Database::new("v3_db", engine.clone());
    db.open(&schema).await.unwrap();

    assert_eq!(db.version(), Some(3));
    assert_eq!(db.store_names(), vec!["posts".to_owned()]);

    // The doomed store was scanned exactly once, for the capture.
    assert_eq!(engine.cursor_opens("v3_db", "users"), 1);
}

#[tokio::test]
async fn fresh_open_applies_every_block_in_order() {
    // No persisted state at all: versions 1, 2, 3 run back to back in
    // one upgrade, and block 3's task still sees the v1 seed records.
    let (_engine, db) = open_pair("fresh_v3_db");
    let schema = schema_v3().add_migrate_task(verify_lost("users", 2));
    db.open(&schema).await.unwrap();

    assert_eq!(db.version(), Some(3));
    assert_eq!(db.store_names(), vec!["posts".to_owned()]);
}

#[tokio::test]
async fn missing_version_blocks_are_skipped() {
    let (_engine, db) = open_pair("sparse_db");

    let schema = SchemaBuilder::new()
        .define(1)
        .unwrap()
        .add_store("first", AddStoreOptions::default())
        .unwrap()
        .define(3)
        .unwrap()
        .add_store("third", AddStoreOptions::default())
        .unwrap();

    db.open(&schema).await.unwrap();
    assert_eq!(db.version(), Some(3));
    assert_eq!(
        db.store_names(),
        vec!["first".to_owned(), "third".to_owned()]
    );
}

#[tokio::test]
async fn captured_records_preserve_key_order() {
    let (_engine, db) = open_pair("order_db");

    let order_check = migrate_task(|lost: LostData, _ctx| async move {
        let bundle = lost.ok_or_else(|| EvoError::task_msg("expected lost data"))?;
        let records = bundle
            .get("users")
            .ok_or_else(|| EvoError::task_msg("no users entry"))?;
        let ids: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect();
        if ids != vec![1, 2] {
            return Err(EvoError::task_msg(format!("wrong capture order: {ids:?}")));
        }
        Ok(Value::Null)
    });

    let schema = schema_v1()
        .define(2)
        .unwrap()
        .del_store("users")
        .unwrap()
        .add_migrate_task(order_check);

    db.open(&schema).await.unwrap();
    assert!(db.store_names().is_empty());
}

#[tokio::test]
async fn dropping_without_tasks_never_scans_the_store() {
    let (engine, db) = open_pair("no_scan_db");
    db.open(&schema_v1()).await.unwrap();
    db.close();

    // Block 2 drops `users` and registers no tasks: nothing will ever
    // read the records, so the engine must not be asked to cursor them.
    let schema = schema_v1().define(2).unwrap().del_store("users").unwrap();
    let db = Database::new("no_scan_db", engine.clone());
    db.open(&schema).await.unwrap();

    assert!(db.store_names().is_empty());
    assert_eq!(engine.cursor_opens("no_scan_db", "users"), 0);
}

#[tokio::test]
async fn a_failing_migration_task_rolls_the_upgrade_back() {
    let (engine, db) = open_pair("rollback_db");
    db.open(&schema_v1()).await.unwrap();
    db.close();

    let failing = migrate_task(|_lost, ctx| async move {
        // Write something first so the rollback is observable.
        let users = ctx.trx.store("users")?;
        users.put(user(7)).await?;
        Err(EvoError::task_msg("migration rejected"))
    });
    let schema = schema_v1()
        .define(2)
        .unwrap()
        .get_store("users")
        .unwrap()
        .del_index("by_email")
        .unwrap()
        .add_migrate_task(failing);

    let db = Database::new("rollback_db", engine.clone());
    let err = db.open(&schema).await.unwrap_err();
    assert!(matches!(err, EvoError::Task(_)));
    assert!(!db.is_open());

    // The database is still at version 1 with its pre-upgrade state.
    let db = Database::new("rollback_db", engine);
    db.open(&schema_v1()).await.unwrap();
    assert_eq!(db.version(), Some(1));

    let indexes = db
        .transaction(&["users"], TransactionMode::ReadOnly, index_names_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(indexes.len(), 2);

    let count = db
        .transaction(&["users"], TransactionMode::ReadOnly, count_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn opening_below_the_persisted_version_is_rejected() {
    let (engine, db) = open_pair("downgrade_db");
    db.open(&schema_v2()).await.unwrap();
    db.close();

    let db = Database::new("downgrade_db", engine);
    let err = db.open(&schema_v1()).await.unwrap_err();
    assert!(matches!(
        err,
        EvoError::Engine(EngineError::VersionMismatch { .. })
    ));
}

#[tokio::test]
async fn reopening_while_active_is_rejected() {
    let (_engine, db) = open_pair("reopen_db");
    db.open(&schema_v1()).await.unwrap();

    let err = db.open(&schema_v1()).await.unwrap_err();
    assert!(matches!(err, EvoError::AlreadyOpen));
}

#[tokio::test]
async fn migration_tasks_run_after_structural_changes() {
    // The v1 task writes into a store created by the very same block,
    // and a v2 task sees the index dropped in its own block.
    let (_engine, db) = open_pair("staging_db");

    let check_shape = migrate_task(|_lost, ctx| async move {
        let users = ctx.trx.store("users")?;
        if users.index_names() != vec!["by_name".to_owned()] {
            return Err(EvoError::task_msg("structural changes not applied yet"));
        }
        Ok(Value::Null)
    });

    let schema = schema_v1()
        .define(2)
        .unwrap()
        .get_store("users")
        .unwrap()
        .del_index("by_email")
        .unwrap()
        .add_migrate_task(check_shape)
        .add_migrate_task(add_record("users", user(3)));

    db.open(&schema).await.unwrap();

    let count = db
        .transaction(&["users"], TransactionMode::ReadOnly, count_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn delete_removes_the_database_from_the_engine() {
    let (engine, db) = open_pair("delete_db");
    db.open(&schema_v1()).await.unwrap();
    db.delete().await.unwrap();
    assert!(!db.is_open());

    // A fresh open starts from scratch: the v1 block runs again.
    let db = Database::new("delete_db", engine);
    db.open(&schema_v1()).await.unwrap();
    let count = db
        .transaction(&["users"], TransactionMode::ReadOnly, count_task("users"))
        .execute(())
        .await
        .unwrap();
    assert_eq!(count, 2);
}
