//! # Evostore
//!
//! Versioned schema evolution and data migration for request-based
//! key-value store engines, driven by an async task pipeline.
//!
//! ## Features
//!
//! - **Versioned Schemas**: declare stores and indexes version by
//!   version; opening at a newer version runs exactly the pending
//!   deltas, strictly in order, with gaps skipped
//! - **Custom Migrations**: per-version data-transformation tasks run
//!   after the structural changes, with the records of dropped stores
//!   captured for them — and never scanned when nothing will read them
//! - **Task Pipeline**: sequential and parallel composition of
//!   asynchronous steps with ordered fan-out results and
//!   timeout-bounded execution
//! - **Safe Failure**: engine-reported errors take precedence, and a
//!   failed execution aborts its transaction before surfacing
//! - **Pluggable Engines**: the storage host sits behind object-safe
//!   async traits; an in-memory reference engine ships with the crate
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use evostore::prelude::*;
//! use serde_json::{Value, json};
//!
//! // Declare version 1: one store, one index, two seed records.
//! let schema = SchemaBuilder::new()
//!     .define(1)?
//!     .add_store("users", AddStoreOptions::builder().key_path("id").build())?
//!     .add_index("by_email", "email", AddIndexOptions::builder().unique(true).build())?
//!     .add_migrate_task(migrate_task(|_lost, ctx| async move {
//!         let users = ctx.trx.store("users")?;
//!         users.put(json!({ "id": 1, "email": "amara@example.com" })).await?;
//!         Ok(Value::Null)
//!     }));
//!
//! // Open against an engine; pending migrations run here.
//! let db = Database::new("app", Arc::new(MemoryEngine::new()));
//! db.open(&schema).await?;
//!
//! // Ordinary transactions are pipelines too.
//! let count = db
//!     .transaction(&["users"], TransactionMode::ReadOnly, task_fn(|_: (), ctx| async move {
//!         ctx.trx.store("users")?.count(None).await
//!     }))
//!     .execute(())
//!     .await?;
//! assert_eq!(count, 1);
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod key;
pub mod migration;
pub mod pipeline;
pub mod prelude;
pub mod schema;
pub mod transaction;
