//! Store engine abstraction.
//!
//! Everything the migration engine and the task pipeline know about
//! the underlying storage host goes through these object-safe traits.
//! The host is request-based: every operation is asynchronous and a
//! suspension point, and the engine owns the version-upgrade protocol —
//! it invokes the supplied [`UpgradeHook`] exactly once per physical
//! upgrade, under a version-change transaction, and rolls the upgrade
//! back if the hook fails.
//!
//! [`memory::MemoryEngine`] is the in-process reference implementation.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, EvoResult};
use crate::key::{Key, KeyRange, Record};
use crate::schema::{IndexDescription, StoreDescription};
use crate::transaction::TransactionMode;

/// Entry point to a storage host: opens and deletes named databases.
#[async_trait]
pub trait StoreEngine: Send + Sync {
    /// Open `name` at `version`, invoking `upgrade` first when the
    /// persisted version is older. Fails when `version` is below the
    /// persisted version.
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &dyn UpgradeHook,
    ) -> EvoResult<Arc<dyn DatabaseHandle>>;

    /// Remove a database and all of its stores.
    async fn delete_database(&self, name: &str) -> EvoResult<()>;
}

/// The single-shot upgrade callback the engine drives.
///
/// `old_version` is 0 for a freshly created database. The transaction
/// handle is scoped to the whole database and is the only handle on
/// which structural changes are valid.
#[async_trait]
pub trait UpgradeHook: Send + Sync {
    async fn upgrade(
        &self,
        old_version: u32,
        new_version: u32,
        trx: Arc<dyn TransactionHandle>,
    ) -> EvoResult<()>;
}

/// An active connection to one database.
pub trait DatabaseHandle: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    fn store_names(&self) -> Vec<String>;

    /// Begin a transaction over `stores`. [`TransactionMode::VersionChange`]
    /// is reserved to the engine's upgrade protocol and is rejected here.
    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> EvoResult<Arc<dyn TransactionHandle>>;

    fn close(&self);
}

/// A live transaction. Shared read-only by every pipeline step of one
/// execution.
#[async_trait]
pub trait TransactionHandle: Send + Sync {
    fn mode(&self) -> TransactionMode;

    /// Resolve a store in this transaction's scope.
    fn store(&self, name: &str) -> EvoResult<Arc<dyn StoreHandle>>;

    /// Create a store. Version-change transactions only.
    async fn create_store(&self, desc: &StoreDescription) -> EvoResult<()>;

    /// Drop a store and everything in it. Version-change transactions only.
    async fn delete_store(&self, name: &str) -> EvoResult<()>;

    /// Roll back every change made under this transaction.
    fn abort(&self);

    /// Take the engine-reported error for this transaction, if any.
    ///
    /// Engine errors recorded here take precedence over task-level
    /// errors when an execution's final outcome is decided.
    fn take_error(&self) -> Option<EngineError>;
}

/// One object store inside a live transaction.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    fn name(&self) -> &str;

    fn key_path(&self) -> Option<String>;

    fn auto_increment(&self) -> bool;

    fn index_names(&self) -> Vec<String>;

    /// Register an index. Version-change transactions only.
    async fn create_index(&self, desc: &IndexDescription) -> EvoResult<()>;

    /// Drop an index. Version-change transactions only.
    async fn delete_index(&self, name: &str) -> EvoResult<()>;

    /// Store a record under its in-line (or generated) key and return
    /// that key. An existing record under the same key is replaced.
    async fn put(&self, record: Record) -> EvoResult<Key>;

    /// Store a record under an explicit out-of-line key.
    async fn put_with_key(&self, key: Key, record: Record) -> EvoResult<()>;

    async fn get(&self, key: &Key) -> EvoResult<Option<Record>>;

    /// Count records, optionally restricted to a key range.
    async fn count(&self, range: Option<&KeyRange>) -> EvoResult<u64>;

    /// Open a forward cursor in key order over a stable snapshot.
    async fn open_cursor(&self, range: Option<&KeyRange>) -> EvoResult<Box<dyn Cursor>>;
}

/// Forward iteration over records; each advance is a host request.
#[async_trait]
pub trait Cursor: Send {
    async fn next(&mut self) -> EvoResult<Option<(Key, Record)>>;
}
