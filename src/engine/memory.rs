//! In-memory reference engine.
//!
//! A complete in-process implementation of the engine traits, used by
//! the test suite and by embedders that want the full versioning and
//! migration machinery without a persistent host. Databases live inside
//! one [`MemoryEngine`] keyed by name; records are held in key order;
//! the version-upgrade protocol matches the request-based hosts this
//! crate targets: the upgrade hook runs exactly once under a
//! version-change transaction, the version is bumped only on success,
//! and failure rolls the whole upgrade back.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use crate::engine::{Cursor, DatabaseHandle, StoreEngine, StoreHandle, TransactionHandle, UpgradeHook};
use crate::error::{EngineError, EvoResult};
use crate::key::{Key, KeyRange, Record, path_value, set_path_value};
use crate::schema::{IndexDescription, IndexField, StoreDescription};
use crate::transaction::TransactionMode;

/// In-process storage host holding any number of named databases.
#[derive(Default)]
pub struct MemoryEngine {
    dbs: Mutex<HashMap<String, Arc<Mutex<DbState>>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many cursors have been opened on `store` of `db` since the
    /// engine was created. Survives store deletion; instrumentation for
    /// tests and diagnostics.
    pub fn cursor_opens(&self, db: &str, store: &str) -> u64 {
        self.dbs
            .lock()
            .get(db)
            .map(|state| {
                state
                    .lock()
                    .cursor_opens
                    .get(store)
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl StoreEngine for MemoryEngine {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &dyn UpgradeHook,
    ) -> EvoResult<Arc<dyn DatabaseHandle>> {
        let db = {
            let mut dbs = self.dbs.lock();
            dbs.entry(name.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(DbState::default())))
                .clone()
        };

        let old = db.lock().version;
        if version < old {
            return Err(EngineError::VersionMismatch {
                name: name.to_owned(),
                requested: version,
                current: old,
            }
            .into());
        }

        if version > old {
            debug!("memory engine: upgrading '{name}' from v{old} to v{version}");
            let shared = Arc::new(TrxShared::new(
                db.clone(),
                TransactionMode::VersionChange,
                Some(db.lock().stores.clone()),
            ));
            let trx: Arc<dyn TransactionHandle> = Arc::new(MemoryTransaction {
                shared,
                scope: None,
            });

            match upgrade.upgrade(old, version, trx.clone()).await {
                Ok(()) => {
                    if let Some(err) = trx.take_error() {
                        trx.abort();
                        return Err(err.into());
                    }
                    db.lock().version = version;
                }
                Err(err) => {
                    trx.abort();
                    return Err(err);
                }
            }
        }

        Ok(Arc::new(MemoryDatabase {
            name: name.to_owned(),
            db,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self, name: &str) -> EvoResult<()> {
        debug!("memory engine: deleting database '{name}'");
        self.dbs.lock().remove(name);
        Ok(())
    }
}

#[derive(Default)]
struct DbState {
    version: u32,
    stores: BTreeMap<String, StoreState>,
    cursor_opens: BTreeMap<String, u64>,
}

#[derive(Clone)]
struct StoreState {
    key_path: Option<String>,
    auto_increment: bool,
    next_key: i64,
    indexes: BTreeMap<String, IndexState>,
    records: BTreeMap<Key, Record>,
}

impl StoreState {
    fn new(desc: &StoreDescription) -> Self {
        Self {
            key_path: desc.key_path.clone(),
            auto_increment: desc.auto_increment,
            next_key: 1,
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }
}

#[derive(Clone)]
struct IndexState {
    desc: IndexDescription,
    entries: BTreeMap<Key, Vec<Key>>,
}

struct MemoryDatabase {
    name: String,
    db: Arc<Mutex<DbState>>,
    closed: AtomicBool,
}

impl DatabaseHandle for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.db.lock().version
    }

    fn store_names(&self) -> Vec<String> {
        self.db.lock().stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> EvoResult<Arc<dyn TransactionHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::DatabaseClosed.into());
        }
        if mode == TransactionMode::VersionChange {
            return Err(EngineError::VersionChangeReserved.into());
        }
        if stores.is_empty() {
            return Err(EngineError::DataError("empty transaction scope".to_owned()).into());
        }

        let state = self.db.lock();
        for name in stores {
            if !state.stores.contains_key(name) {
                return Err(EngineError::StoreNotFound(name.clone()).into());
            }
        }

        // Read-write transactions snapshot their scope up front so abort
        // can restore it; read-only transactions have nothing to undo.
        let snapshot = (mode == TransactionMode::ReadWrite).then(|| {
            stores
                .iter()
                .filter_map(|name| {
                    state
                        .stores
                        .get(name)
                        .map(|s| (name.clone(), s.clone()))
                })
                .collect::<BTreeMap<_, _>>()
        });
        drop(state);

        Ok(Arc::new(MemoryTransaction {
            shared: Arc::new(TrxShared::new(self.db.clone(), mode, snapshot)),
            scope: Some(stores.to_vec()),
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct TrxShared {
    db: Arc<Mutex<DbState>>,
    mode: TransactionMode,
    snapshot: Mutex<Option<BTreeMap<String, StoreState>>>,
    error: Mutex<Option<EngineError>>,
    active: AtomicBool,
}

impl TrxShared {
    fn new(
        db: Arc<Mutex<DbState>>,
        mode: TransactionMode,
        snapshot: Option<BTreeMap<String, StoreState>>,
    ) -> Self {
        Self {
            db,
            mode,
            snapshot: Mutex::new(snapshot),
            error: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::TransactionInactive)
        }
    }

    /// Record a request failure on the transaction; the first one wins.
    fn record(&self, err: EngineError) -> EngineError {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
        err
    }
}

struct MemoryTransaction {
    shared: Arc<TrxShared>,
    /// `None` grants whole-database scope (version change).
    scope: Option<Vec<String>>,
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    fn store(&self, name: &str) -> EvoResult<Arc<dyn StoreHandle>> {
        self.shared.ensure_active()?;
        if let Some(scope) = &self.scope {
            if !scope.iter().any(|s| s == name) {
                return Err(EngineError::StoreNotInScope(name.to_owned()).into());
            }
        }
        if !self.shared.db.lock().stores.contains_key(name) {
            return Err(EngineError::StoreNotFound(name.to_owned()).into());
        }
        Ok(Arc::new(MemoryStore {
            name: name.to_owned(),
            shared: self.shared.clone(),
        }))
    }

    async fn create_store(&self, desc: &StoreDescription) -> EvoResult<()> {
        self.shared.ensure_active()?;
        if self.shared.mode != TransactionMode::VersionChange {
            return Err(EngineError::NotVersionChange.into());
        }
        tokio::task::yield_now().await;

        let mut state = self.shared.db.lock();
        if state.stores.contains_key(&desc.name) {
            return Err(EngineError::StoreExists(desc.name.clone()).into());
        }
        state
            .stores
            .insert(desc.name.clone(), StoreState::new(desc));
        Ok(())
    }

    async fn delete_store(&self, name: &str) -> EvoResult<()> {
        self.shared.ensure_active()?;
        if self.shared.mode != TransactionMode::VersionChange {
            return Err(EngineError::NotVersionChange.into());
        }
        tokio::task::yield_now().await;

        let mut state = self.shared.db.lock();
        if state.stores.remove(name).is_none() {
            return Err(EngineError::StoreNotFound(name.to_owned()).into());
        }
        Ok(())
    }

    fn abort(&self) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(snapshot) = self.shared.snapshot.lock().take() {
            let mut state = self.shared.db.lock();
            match self.shared.mode {
                // A version-change snapshot covers the whole database.
                TransactionMode::VersionChange => state.stores = snapshot,
                _ => {
                    for (name, store) in snapshot {
                        state.stores.insert(name, store);
                    }
                }
            }
            debug!("memory engine: transaction aborted, snapshot restored");
        }
    }

    fn take_error(&self) -> Option<EngineError> {
        self.shared.error.lock().take()
    }
}

struct MemoryStore {
    name: String,
    shared: Arc<TrxShared>,
}

impl MemoryStore {
    fn put_impl(&self, explicit_key: Option<Key>, mut record: Record) -> Result<Key, EngineError> {
        self.shared.ensure_active()?;
        if self.shared.mode == TransactionMode::ReadOnly {
            return Err(EngineError::ReadOnlyTransaction);
        }

        let mut state = self.shared.db.lock();
        let store = state
            .stores
            .get_mut(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;

        let key = match (&explicit_key, &store.key_path) {
            (Some(_), Some(_)) => {
                return Err(EngineError::DataError(format!(
                    "store '{}' uses in-line keys",
                    self.name
                )));
            }
            (Some(key), None) => key.clone(),
            (None, Some(path)) => match path_value(&record, path).and_then(Key::from_json) {
                Some(key) => key,
                None if store.auto_increment => {
                    let key = Key::Integer(store.next_key);
                    if !set_path_value(&mut record, path, &key) {
                        return Err(EngineError::DataError(format!(
                            "cannot write generated key at '{path}'"
                        )));
                    }
                    key
                }
                None => {
                    return Err(EngineError::DataError(format!(
                        "record has no key at '{path}'"
                    )));
                }
            },
            (None, None) if store.auto_increment => Key::Integer(store.next_key),
            (None, None) => {
                return Err(EngineError::DataError(format!(
                    "store '{}' uses out-of-line keys; supply one with put_with_key",
                    self.name
                )));
            }
        };

        // Uniqueness is checked against entries other records own before
        // anything is mutated, so a rejected put leaves no trace.
        for index in store.indexes.values() {
            if !index.desc.unique {
                continue;
            }
            for index_key in index_keys(&index.desc, &record) {
                let taken = index
                    .entries
                    .get(&index_key)
                    .is_some_and(|primaries| primaries.iter().any(|p| p != &key));
                if taken {
                    return Err(EngineError::ConstraintViolation {
                        store: self.name.clone(),
                        index: index.desc.name.clone(),
                    });
                }
            }
        }

        if let Some(previous) = store.records.get(&key).cloned() {
            let indexes: Vec<String> = store.indexes.keys().cloned().collect();
            for name in indexes {
                remove_index_entries(store, &name, &key, &previous);
            }
        }

        let index_names: Vec<String> = store.indexes.keys().cloned().collect();
        for name in index_names {
            if let Some(index) = store.indexes.get(&name) {
                let keys = index_keys(&index.desc, &record);
                if let Some(index) = store.indexes.get_mut(&name) {
                    for index_key in keys {
                        let primaries = index.entries.entry(index_key).or_default();
                        if !primaries.contains(&key) {
                            primaries.push(key.clone());
                        }
                    }
                }
            }
        }

        if let Key::Integer(n) = key {
            // Explicit integer keys advance the generator past them.
            if n >= store.next_key {
                store.next_key = n + 1;
            }
        }
        store.records.insert(key.clone(), record);
        Ok(key)
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_path(&self) -> Option<String> {
        self.shared
            .db
            .lock()
            .stores
            .get(&self.name)
            .and_then(|s| s.key_path.clone())
    }

    fn auto_increment(&self) -> bool {
        self.shared
            .db
            .lock()
            .stores
            .get(&self.name)
            .is_some_and(|s| s.auto_increment)
    }

    fn index_names(&self) -> Vec<String> {
        self.shared
            .db
            .lock()
            .stores
            .get(&self.name)
            .map(|s| s.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn create_index(&self, desc: &IndexDescription) -> EvoResult<()> {
        self.shared.ensure_active()?;
        if self.shared.mode != TransactionMode::VersionChange {
            return Err(EngineError::NotVersionChange.into());
        }
        tokio::task::yield_now().await;

        let mut state = self.shared.db.lock();
        let store = state
            .stores
            .get_mut(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        if store.indexes.contains_key(&desc.name) {
            return Err(EngineError::IndexExists {
                store: self.name.clone(),
                index: desc.name.clone(),
            }
            .into());
        }

        // Backfill from existing records, enforcing uniqueness as we go.
        let mut entries: BTreeMap<Key, Vec<Key>> = BTreeMap::new();
        for (primary, record) in &store.records {
            for index_key in index_keys(desc, record) {
                let primaries = entries.entry(index_key).or_default();
                if desc.unique && !primaries.is_empty() {
                    return Err(EngineError::ConstraintViolation {
                        store: self.name.clone(),
                        index: desc.name.clone(),
                    }
                    .into());
                }
                primaries.push(primary.clone());
            }
        }

        store.indexes.insert(
            desc.name.clone(),
            IndexState {
                desc: desc.clone(),
                entries,
            },
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> EvoResult<()> {
        self.shared.ensure_active()?;
        if self.shared.mode != TransactionMode::VersionChange {
            return Err(EngineError::NotVersionChange.into());
        }
        tokio::task::yield_now().await;

        let mut state = self.shared.db.lock();
        let store = state
            .stores
            .get_mut(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        if store.indexes.remove(name).is_none() {
            return Err(EngineError::IndexNotFound {
                store: self.name.clone(),
                index: name.to_owned(),
            }
            .into());
        }
        Ok(())
    }

    async fn put(&self, record: Record) -> EvoResult<Key> {
        tokio::task::yield_now().await;
        self.put_impl(None, record)
            .map_err(|err| self.shared.record(err).into())
    }

    async fn put_with_key(&self, key: Key, record: Record) -> EvoResult<()> {
        tokio::task::yield_now().await;
        self.put_impl(Some(key), record)
            .map(|_| ())
            .map_err(|err| self.shared.record(err).into())
    }

    async fn get(&self, key: &Key) -> EvoResult<Option<Record>> {
        self.shared.ensure_active()?;
        tokio::task::yield_now().await;
        let state = self.shared.db.lock();
        let store = state
            .stores
            .get(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        Ok(store.records.get(key).cloned())
    }

    async fn count(&self, range: Option<&KeyRange>) -> EvoResult<u64> {
        self.shared.ensure_active()?;
        tokio::task::yield_now().await;
        let state = self.shared.db.lock();
        let store = state
            .stores
            .get(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        let count = match range {
            Some(range) => store.records.keys().filter(|&k| range.contains(k)).count(),
            None => store.records.len(),
        };
        Ok(count as u64)
    }

    async fn open_cursor(&self, range: Option<&KeyRange>) -> EvoResult<Box<dyn Cursor>> {
        self.shared.ensure_active()?;
        tokio::task::yield_now().await;
        let mut state = self.shared.db.lock();
        *state.cursor_opens.entry(self.name.clone()).or_insert(0) += 1;
        let store = state
            .stores
            .get(&self.name)
            .ok_or_else(|| EngineError::StoreNotFound(self.name.clone()))?;
        let items: VecDeque<(Key, Record)> = store
            .records
            .iter()
            .filter(|&(k, _)| range.is_none_or(|r| r.contains(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(MemoryCursor { items }))
    }
}

struct MemoryCursor {
    items: VecDeque<(Key, Record)>,
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn next(&mut self) -> EvoResult<Option<(Key, Record)>> {
        // Each advance is a host round trip.
        tokio::task::yield_now().await;
        Ok(self.items.pop_front())
    }
}

/// Resolve the index keys a record contributes to one index.
///
/// A missing or uninterpretable field simply contributes nothing; a
/// multi-entry index fans an array value out to one entry per element.
fn index_keys(desc: &IndexDescription, record: &Record) -> Vec<Key> {
    match &desc.field {
        IndexField::Single(field) => match path_value(record, field) {
            None => Vec::new(),
            Some(value) => {
                if desc.multi_entry {
                    if let Some(items) = value.as_array() {
                        let mut keys: Vec<Key> =
                            items.iter().filter_map(Key::from_json).collect();
                        keys.sort();
                        keys.dedup();
                        return keys;
                    }
                }
                Key::from_json(value).into_iter().collect()
            }
        },
        IndexField::Compound(fields) => {
            let parts: Option<Vec<Key>> = fields
                .iter()
                .map(|f| path_value(record, f).and_then(Key::from_json))
                .collect();
            match parts {
                Some(parts) => vec![Key::Array(parts)],
                None => Vec::new(),
            }
        }
    }
}

fn remove_index_entries(store: &mut StoreState, index_name: &str, primary: &Key, record: &Record) {
    let Some(index) = store.indexes.get(index_name) else {
        return;
    };
    let keys = index_keys(&index.desc, record);
    if let Some(index) = store.indexes.get_mut(index_name) {
        for index_key in keys {
            if let Some(primaries) = index.entries.get_mut(&index_key) {
                primaries.retain(|p| p != primary);
                if primaries.is_empty() {
                    index.entries.remove(&index_key);
                }
            }
        }
    }
}
