//! Transactional execution of task pipelines.
//!
//! A [`Transaction`] is a reusable template: a pipeline bound to a
//! database, a store-name scope, and a mode. [`Transaction::execute`]
//! waits for the connection to become active, opens a live engine
//! transaction over the scope, and drives the pipeline against it.
//! Failure handling follows one rule: if the engine reported an error
//! for the transaction, that error wins over whatever the pipeline
//! returned, and the transaction is aborted before the error surfaces —
//! a failed execution never half-commits.
//!
//! # Example
//!
//! ```ignore
//! use evostore::prelude::*;
//!
//! let count = db.transaction(
//!     &["users"],
//!     TransactionMode::ReadOnly,
//!     task_fn(|_: (), ctx| async move {
//!         ctx.trx.store("users")?.count(None).await
//!     }),
//! );
//! let n = count.execute(()).await?;
//! ```

use std::time::Duration;

use strum::{Display, EnumString};

use crate::connection::Database;
use crate::error::{EvoError, EvoResult};
use crate::pipeline::{Pipeline, Task, TaskContext};

/// How long [`Transaction::execute`] lets a pipeline run.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Transaction mode. Parses from the short tokens `"r"` and `"rw"`
/// (or the long forms); `VersionChange` is engine-initiated only and
/// rejected by [`DatabaseHandle::transaction`](crate::engine::DatabaseHandle::transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TransactionMode {
    #[strum(serialize = "r", serialize = "readonly")]
    ReadOnly,
    #[strum(serialize = "rw", serialize = "readwrite")]
    ReadWrite,
    #[strum(serialize = "versionchange")]
    VersionChange,
}

/// A pipeline bound to a database, scope, and mode.
///
/// Cloning yields an independently runnable template sharing no per-run
/// state, so one declared transaction can execute repeatedly or
/// concurrently.
pub struct Transaction<I, O> {
    db: Database,
    store_names: Vec<String>,
    mode: TransactionMode,
    pipeline: Pipeline<I, O>,
}

impl<I, O> Clone for Transaction<I, O> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            store_names: self.store_names.clone(),
            mode: self.mode,
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<I, O> Transaction<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new(
        db: Database,
        stores: &[&str],
        mode: TransactionMode,
        task: impl Task<I, O>,
    ) -> Self {
        Self {
            db,
            store_names: stores.iter().map(|s| (*s).to_owned()).collect(),
            mode,
            pipeline: Pipeline::from_task(task),
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn store_names(&self) -> &[String] {
        &self.store_names
    }

    /// Extend the pipeline with a further step.
    pub fn pipe<R>(self, task: impl Task<O, R>) -> Transaction<I, R>
    where
        R: Send + 'static,
    {
        Transaction {
            db: self.db,
            store_names: self.store_names,
            mode: self.mode,
            pipeline: self.pipeline.pipe(task),
        }
    }

    /// Run the pipeline under a fresh engine transaction with the
    /// default timeout.
    pub async fn execute(&self, input: I) -> EvoResult<O> {
        self.execute_timeout(input, DEFAULT_TASK_TIMEOUT).await
    }

    /// Run the pipeline under a fresh engine transaction.
    ///
    /// Waits for the owning connection to become active first. On any
    /// failure — pipeline error, engine-reported transaction error, or
    /// timeout — the transaction is aborted before the error is
    /// returned; an engine-reported error takes precedence over a
    /// pipeline error observed in the same execution.
    pub async fn execute_timeout(&self, input: I, timeout: Duration) -> EvoResult<O> {
        let handle = self.db.ready().await?;
        let trx = handle.transaction(&self.store_names, self.mode)?;
        let ctx = TaskContext::new(trx.clone());

        let result = self.pipeline.run_timeout(input, &ctx, timeout).await;

        match (result, trx.take_error()) {
            (Ok(output), None) => Ok(output),
            (_, Some(engine_err)) => {
                trx.abort();
                Err(EvoError::Engine(engine_err))
            }
            (Err(task_err), None) => {
                trx.abort();
                Err(task_err)
            }
        }
    }
}
