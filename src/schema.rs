//! Versioned schema declaration.
//!
//! [`SchemaBuilder`] records, version by version, which stores and
//! indexes exist and which custom migration tasks run when a database
//! is opened at a newer version than it was last persisted at. The
//! builder keeps two layers of state: a *registry* holding the current
//! shape of every store, and per-version *blocks* holding the deltas
//! (stores/indexes created or dropped at that version, plus migration
//! tasks). [`SchemaBuilder::build`] compiles the version map into the
//! upgrade procedure the engine drives.
//!
//! All validation is synchronous: every method checks its preconditions
//! and returns a [`SchemaError`] immediately on misuse.
//!
//! # Example
//!
//! ```ignore
//! use evostore::prelude::*;
//!
//! let schema = SchemaBuilder::new()
//!     .define(1)?
//!     .add_store("users", AddStoreOptions::builder().key_path("id").build())?
//!     .add_index("by_email", "email", AddIndexOptions::builder().unique(true).build())?
//!     .define(2)?
//!     .add_store("posts", AddStoreOptions::default())?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::SchemaError;
use crate::migration::{MigrateTask, UpgradeProcedure};

/// Which record field(s) an index covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::From)]
pub enum IndexField {
    /// A single dotted key path.
    Single(String),
    /// An ordered list of key paths forming a compound key.
    Compound(Vec<String>),
}

impl From<&str> for IndexField {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<&[&str]> for IndexField {
    fn from(value: &[&str]) -> Self {
        Self::Compound(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Declarative shape of a store, independent of any live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescription {
    pub name: String,
    /// Record field used as the primary key; `None` means out-of-line keys.
    pub key_path: Option<String>,
    pub auto_increment: bool,
    pub indexes: BTreeMap<String, IndexDescription>,
}

/// Declarative shape of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    pub store_name: String,
    pub field: IndexField,
    pub unique: bool,
    /// Fan array-valued fields out to one index entry per element.
    pub multi_entry: bool,
}

/// Options for [`SchemaBuilder::add_store`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct AddStoreOptions {
    #[builder(default, setter(strip_option, into))]
    pub key_path: Option<String>,
    #[builder(default)]
    pub auto_increment: bool,
}

/// Options for [`SchemaBuilder::add_index`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct AddIndexOptions {
    #[builder(default)]
    pub unique: bool,
    #[builder(default)]
    pub multi_entry: bool,
}

/// The structural and data changes declared under one version.
#[derive(Clone)]
pub struct VersionInfo {
    pub version: u32,
    pub stores: Vec<StoreDescription>,
    pub drop_stores: Vec<StoreDescription>,
    pub indexes: Vec<IndexDescription>,
    pub drop_indexes: Vec<IndexDescription>,
    pub tasks: Vec<MigrateTask>,
}

impl VersionInfo {
    fn new(version: u32) -> Self {
        Self {
            version,
            stores: Vec::new(),
            drop_stores: Vec::new(),
            indexes: Vec::new(),
            drop_indexes: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

impl fmt::Debug for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionInfo")
            .field("version", &self.version)
            .field("stores", &self.stores)
            .field("drop_stores", &self.drop_stores)
            .field("indexes", &self.indexes)
            .field("drop_indexes", &self.drop_indexes)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Mutable, versioned declaration of stores, indexes, and migration
/// tasks.
///
/// Methods consume and return the builder so declarations chain with
/// `?`. Cloning produces a structurally independent copy — registry and
/// version blocks are deep-copied, task steps are shared by reference
/// (they are stateless) — so one schema lineage can be branched and
/// extended without affecting the other.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    current_version: u32,
    current_store: Option<String>,
    stores: BTreeMap<String, StoreDescription>,
    versions: BTreeMap<u32, VersionInfo>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// A builder starting at version 1 with an empty block.
    pub fn new() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(1, VersionInfo::new(1));
        Self {
            current_version: 1,
            current_store: None,
            stores: BTreeMap::new(),
            versions,
        }
    }

    /// The version the builder is currently declaring.
    pub fn version(&self) -> u32 {
        self.current_version
    }

    /// Every store currently registered, in name order.
    pub fn stores(&self) -> Vec<&StoreDescription> {
        self.stores.values().collect()
    }

    pub fn store(&self, name: &str) -> Option<&StoreDescription> {
        self.stores.get(name)
    }

    /// Start (or re-enter) the block for `version`.
    ///
    /// Versions are strictly increasing across the builder's lifetime:
    /// anything below the current version is rejected; the current
    /// version itself re-enters its existing block. Resets the
    /// current-store cursor.
    pub fn define(mut self, version: u32) -> Result<Self, SchemaError> {
        if version == 0 {
            return Err(SchemaError::InvalidVersion(u64::from(version)));
        }
        if version < self.current_version {
            return Err(SchemaError::NonMonotonicVersion {
                requested: version,
                current: self.current_version,
            });
        }
        self.versions
            .entry(version)
            .or_insert_with(|| VersionInfo::new(version));
        self.current_version = version;
        self.current_store = None;
        Ok(self)
    }

    /// Register a store in the current version block and make it the
    /// current store.
    ///
    /// Re-adding a name that is still registered overwrites the live
    /// descriptor: the registry holds the current shape, version blocks
    /// hold the deltas.
    pub fn add_store(mut self, name: &str, opts: AddStoreOptions) -> Result<Self, SchemaError> {
        if opts.auto_increment && opts.key_path.is_none() {
            return Err(SchemaError::AutoIncrementWithoutKeyPath(name.to_owned()));
        }

        let desc = StoreDescription {
            name: name.to_owned(),
            key_path: opts.key_path,
            auto_increment: opts.auto_increment,
            indexes: BTreeMap::new(),
        };

        self.stores.insert(name.to_owned(), desc.clone());

        let block = self.active_block();
        match block.stores.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = desc,
            None => block.stores.push(desc),
        }

        self.current_store = Some(name.to_owned());
        Ok(self)
    }

    /// Unregister a store and record the drop in the current version
    /// block. Clears the current-store cursor.
    pub fn del_store(mut self, name: &str) -> Result<Self, SchemaError> {
        let desc = self
            .stores
            .remove(name)
            .ok_or_else(|| SchemaError::StoreNotDefined(name.to_owned()))?;
        self.active_block().drop_stores.push(desc);
        self.current_store = None;
        Ok(self)
    }

    /// Make a registered store the current store without touching any
    /// version block.
    pub fn get_store(mut self, name: &str) -> Result<Self, SchemaError> {
        if !self.stores.contains_key(name) {
            return Err(SchemaError::StoreNotDefined(name.to_owned()));
        }
        self.current_store = Some(name.to_owned());
        Ok(self)
    }

    /// Declare an index on the current store.
    pub fn add_index(
        mut self,
        name: &str,
        field: impl Into<IndexField>,
        opts: AddIndexOptions,
    ) -> Result<Self, SchemaError> {
        let store_name = self
            .current_store
            .clone()
            .ok_or(SchemaError::NoCurrentStore)?;
        let store = self
            .stores
            .get_mut(&store_name)
            .ok_or_else(|| SchemaError::StoreNotDefined(store_name.clone()))?;

        if store.indexes.contains_key(name) {
            return Err(SchemaError::DuplicateIndex {
                store: store_name,
                index: name.to_owned(),
            });
        }

        let desc = IndexDescription {
            name: name.to_owned(),
            store_name: store_name.clone(),
            field: field.into(),
            unique: opts.unique,
            multi_entry: opts.multi_entry,
        };
        store.indexes.insert(name.to_owned(), desc.clone());
        self.active_block().indexes.push(desc);
        Ok(self)
    }

    /// Drop an index from the current store.
    pub fn del_index(mut self, name: &str) -> Result<Self, SchemaError> {
        let store_name = self
            .current_store
            .clone()
            .ok_or(SchemaError::NoCurrentStore)?;
        let store = self
            .stores
            .get_mut(&store_name)
            .ok_or_else(|| SchemaError::StoreNotDefined(store_name.clone()))?;

        let desc = store
            .indexes
            .remove(name)
            .ok_or_else(|| SchemaError::IndexNotDefined {
                store: store_name,
                index: name.to_owned(),
            })?;
        self.active_block().drop_indexes.push(desc);
        Ok(self)
    }

    /// Append a custom migration task to the current version block. It
    /// runs after all structural changes for that version, receiving
    /// the lost-data bundle of any stores dropped in the same block.
    pub fn add_migrate_task(mut self, task: MigrateTask) -> Self {
        self.active_block().tasks.push(task);
        self
    }

    /// Append several migration tasks at once, in order.
    pub fn add_migrate_tasks(mut self, tasks: impl IntoIterator<Item = MigrateTask>) -> Self {
        self.active_block().tasks.extend(tasks);
        self
    }

    /// Compile the version map into the upgrade procedure the engine
    /// invokes once per physical upgrade.
    pub fn build(&self) -> UpgradeProcedure {
        UpgradeProcedure::new(self.versions.clone())
    }

    fn active_block(&mut self) -> &mut VersionInfo {
        let version = self.current_version;
        self.versions
            .entry(version)
            .or_insert_with(|| VersionInfo::new(version))
    }
}
