//! Prelude module for convenient imports.
//!
//! Re-exports the types most callers need, so a single
//! `use evostore::prelude::*;` is enough to declare a schema, open a
//! database, and run transactions.
//!
//! # What's Included
//!
//! ## Schema Declaration
//!
//! - [`SchemaBuilder`]: versioned store/index/migration declaration
//! - [`AddStoreOptions`] / [`AddIndexOptions`]: builder-pattern options
//! - [`StoreDescription`] / [`IndexDescription`] / [`IndexField`]
//!
//! ## Connection & Transactions
//!
//! - [`Database`]: open/ready/close/delete lifecycle
//! - [`Transaction`] and [`TransactionMode`]: reusable pipeline
//!   templates over a store scope
//!
//! ## Pipeline
//!
//! - [`Pipeline`], [`Task`], [`TaskContext`]: composable async steps
//! - [`task_fn`] / [`shared_task`] / [`parallel`]: step constructors
//! - [`migrate_task`], [`LostData`]: custom migration steps
//!
//! ## Engine
//!
//! - [`StoreEngine`] and friends: the host abstraction
//! - [`MemoryEngine`]: in-process reference engine
//!
//! ## Keys & Errors
//!
//! - [`Key`], [`KeyRange`], [`RangeFactory`], [`Record`]
//! - [`EvoError`], [`EvoResult`], [`SchemaError`], [`EngineError`]

pub use crate::connection::{DEFAULT_READY_TIMEOUT, Database};
pub use crate::engine::memory::MemoryEngine;
pub use crate::engine::{
    Cursor, DatabaseHandle, StoreEngine, StoreHandle, TransactionHandle, UpgradeHook,
};
pub use crate::error::{EngineError, EvoError, EvoResult, SchemaError};
pub use crate::key::{Key, KeyRange, RangeFactory, Record, TaskValue, path_value};
pub use crate::migration::{
    LostData, LostDataBundle, MigrateTask, UpgradeProcedure, migrate_task,
};
pub use crate::pipeline::{
    ArcTask, ParallelGroup, Pipeline, Task, TaskContext, parallel, shared_task, task_fn,
};
pub use crate::schema::{
    AddIndexOptions, AddStoreOptions, IndexDescription, IndexField, SchemaBuilder,
    StoreDescription, VersionInfo,
};
pub use crate::transaction::{DEFAULT_TASK_TIMEOUT, Transaction, TransactionMode};
