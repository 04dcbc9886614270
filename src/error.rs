//! Error types for schema building, migration, and pipeline execution.
//!
//! Errors are split by layer: [`SchemaError`] for synchronous builder
//! validation, [`EngineError`] for failures reported by the underlying
//! store engine, and [`EvoError`] as the umbrella type every async
//! operation returns. When a pipeline run and the engine both report a
//! failure for the same execution, the engine error wins — it is the
//! authoritative statement that the engine refused or aborted work.

use thiserror::Error;

pub type EvoResult<T> = Result<T, EvoError>;

/// Validation errors raised synchronously by [`SchemaBuilder`] methods.
///
/// These are programmer errors and are never recovered internally; the
/// builder surfaces them immediately to the caller.
///
/// [`SchemaBuilder`]: crate::schema::SchemaBuilder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid version {0}: versions start at 1")]
    InvalidVersion(u64),

    #[error("version {requested} is below the current version {current}")]
    NonMonotonicVersion { requested: u32, current: u32 },

    #[error("store '{0}': auto_increment requires a key_path")]
    AutoIncrementWithoutKeyPath(String),

    #[error("store '{0}' is not defined")]
    StoreNotDefined(String),

    #[error("no current store: call add_store or get_store first")]
    NoCurrentStore,

    #[error("index '{index}' is already defined on store '{store}'")]
    DuplicateIndex { store: String, index: String },

    #[error("index '{index}' is not defined on store '{store}'")]
    IndexNotDefined { store: String, index: String },
}

/// Failures reported by the store engine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("store '{0}' already exists")]
    StoreExists(String),

    #[error("store '{0}' not found")]
    StoreNotFound(String),

    #[error("store '{0}' is not in this transaction's scope")]
    StoreNotInScope(String),

    #[error("index '{index}' already exists on store '{store}'")]
    IndexExists { store: String, index: String },

    #[error("index '{index}' not found on store '{store}'")]
    IndexNotFound { store: String, index: String },

    #[error("unique constraint violated on index '{index}' of store '{store}'")]
    ConstraintViolation { store: String, index: String },

    #[error("data error: {0}")]
    DataError(String),

    #[error("operation requires a version-change transaction")]
    NotVersionChange,

    #[error("version-change transactions are engine-initiated only")]
    VersionChangeReserved,

    #[error("write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("transaction is no longer active")]
    TransactionInactive,

    #[error("database '{name}' is at version {current}, cannot open at older version {requested}")]
    VersionMismatch {
        name: String,
        requested: u32,
        current: u32,
    },

    #[error("database connection is closed")]
    DatabaseClosed,
}

/// Umbrella error type for every async operation in the crate.
#[derive(Error, Debug)]
pub enum EvoError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A custom migration or transaction task signalled failure.
    #[error("task error: {0}")]
    Task(#[source] anyhow::Error),

    #[error("pipeline did not resolve within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("database did not become active within {waited_ms}ms")]
    NotReady { waited_ms: u64 },

    #[error("database is already open; close it before reopening")]
    AlreadyOpen,

    #[error("database connection is gone")]
    Closed,
}

impl EvoError {
    /// Wrap an arbitrary error raised by a caller-supplied task.
    pub fn task<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Task(err.into())
    }

    /// Wrap a plain message raised by a caller-supplied task.
    pub fn task_msg(msg: impl Into<String>) -> Self {
        Self::Task(anyhow::anyhow!(msg.into()))
    }
}
