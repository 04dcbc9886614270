//! Database connection wrapper.
//!
//! [`Database`] binds a database name to a store engine and owns the
//! open/ready/close/delete lifecycle. Opening compiles the supplied
//! schema into its upgrade procedure and drives the engine's
//! open-with-upgrade flow; once that completes the connection is
//! *active* and [`Database::ready`] resolves for every waiter. One
//! wrapper manages at most one live connection: reopening while active
//! is an error.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use evostore::prelude::*;
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let db = Database::new("app", engine);
//!
//! let schema = SchemaBuilder::new()
//!     .define(1)?
//!     .add_store("users", AddStoreOptions::builder().key_path("id").build())?;
//!
//! db.open(&schema).await?;
//! assert!(db.is_open());
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;

use crate::engine::{DatabaseHandle, StoreEngine};
use crate::error::{EvoError, EvoResult};
use crate::pipeline::Task;
use crate::schema::SchemaBuilder;
use crate::transaction::{Transaction, TransactionMode};

/// How long [`Database::ready`] waits before giving up.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// A named database bound to a store engine. Cheap to clone; clones
/// share the same connection state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    engine: Arc<dyn StoreEngine>,
    active: watch::Sender<Option<Arc<dyn DatabaseHandle>>>,
}

impl Database {
    pub fn new(name: impl Into<String>, engine: Arc<dyn StoreEngine>) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                engine,
                active,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_open(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// Store names of the active connection; empty when not open.
    pub fn store_names(&self) -> Vec<String> {
        self.inner
            .active
            .borrow()
            .as_ref()
            .map(|handle| handle.store_names())
            .unwrap_or_default()
    }

    /// Version of the active connection.
    pub fn version(&self) -> Option<u32> {
        self.inner
            .active
            .borrow()
            .as_ref()
            .map(|handle| handle.version())
    }

    /// Open the database at the schema's current version, running any
    /// pending migrations first. On success the connection becomes
    /// active and every [`ready`](Self::ready) waiter resolves.
    pub async fn open(&self, schema: &SchemaBuilder) -> EvoResult<()> {
        if self.is_open() {
            return Err(EvoError::AlreadyOpen);
        }
        let procedure = schema.build();
        debug!(
            "opening database '{}' at v{}",
            self.inner.name,
            schema.version()
        );
        let handle = self
            .inner
            .engine
            .open(&self.inner.name, schema.version(), &procedure)
            .await?;
        self.inner.active.send_replace(Some(handle));
        Ok(())
    }

    /// Wait for the connection to become active, up to the default
    /// window.
    pub async fn ready(&self) -> EvoResult<Arc<dyn DatabaseHandle>> {
        self.ready_timeout(DEFAULT_READY_TIMEOUT).await
    }

    /// Wait for the connection to become active, up to `timeout`.
    pub async fn ready_timeout(&self, timeout: Duration) -> EvoResult<Arc<dyn DatabaseHandle>> {
        let mut rx = self.inner.active.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|handle| handle.is_some())).await {
            Ok(Ok(guard)) => guard.as_ref().cloned().ok_or(EvoError::Closed),
            Ok(Err(_)) => Err(EvoError::Closed),
            Err(_) => Err(EvoError::NotReady {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Drop the active connection, if any. Waiters created after this
    /// point block until the next successful [`open`](Self::open).
    pub fn close(&self) {
        if let Some(handle) = self.inner.active.send_replace(None) {
            debug!("closing database '{}'", self.inner.name);
            handle.close();
        }
    }

    /// Close the active connection and delete the database from the
    /// engine.
    pub async fn delete(&self) -> EvoResult<()> {
        self.ready().await?;
        self.close();
        self.inner.engine.delete_database(&self.inner.name).await
    }

    /// Start a transaction template over `stores`, seeded with one
    /// task. Extend with [`Transaction::pipe`], run with
    /// [`Transaction::execute`].
    pub fn transaction<I, O>(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        task: impl Task<I, O>,
    ) -> Transaction<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        Transaction::new(self.clone(), stores, mode, task)
    }
}
