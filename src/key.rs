//! Keys, key ranges, and record values.
//!
//! Records are schema-free [`serde_json::Value`]s. Primary and index
//! keys are [`Key`]s with a total order: integers sort before text,
//! text before arrays, and arrays compare lexicographically. A store
//! with a key path derives its keys from record fields (in-line keys);
//! a store without one takes the key alongside the record at `put`
//! time (out-of-line keys).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored record. Structured, schema-free JSON.
pub type Record = Value;

/// Output value of a pipeline task when no more specific type applies.
pub type TaskValue = Value;

/// An ordered engine key.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::From,
)]
pub enum Key {
    Integer(i64),
    Text(String),
    Array(Vec<Key>),
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl Key {
    /// Interpret a JSON value as a key.
    ///
    /// Integers, strings, and arrays of interpretable values qualify;
    /// everything else (floats, booleans, objects, null) does not.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Integer),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            _ => None,
        }
    }

    /// Render the key back as a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Look up a dotted key path (`"a.b.c"`) inside a record.
pub fn path_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Write a key into a record at a dotted key path, creating
/// intermediate objects as needed. Returns `false` when the path
/// traverses a non-object value.
pub fn set_path_value(record: &mut Value, path: &str, key: &Key) -> bool {
    let mut current = record;
    let segments: Vec<&str> = path.split('.').collect();
    let (last, init) = match segments.split_last() {
        Some(parts) => parts,
        None => return false,
    };

    for segment in init {
        let obj = match current.as_object_mut() {
            Some(obj) => obj,
            None => return false,
        };
        current = obj
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    match current.as_object_mut() {
        Some(obj) => {
            obj.insert((*last).to_owned(), key.to_json());
            true
        }
        None => false,
    }
}

/// An interval of keys, with independently open or closed edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// The range containing exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Every key at or above `lower` (`open` excludes the bound itself).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// Every key at or below `upper` (`open` excludes the bound itself).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// The interval between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            lower_open,
            upper_open,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            if key < lower || (self.lower_open && key == lower) {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if key > upper || (self.upper_open && key == upper) {
                return false;
            }
        }
        true
    }
}

/// Key-range constructor carried on every task context.
///
/// Tasks build ranges through this value instead of reaching for a
/// global, so alternate hosts can run the same task code unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeFactory;

impl RangeFactory {
    pub fn only(&self, key: impl Into<Key>) -> KeyRange {
        KeyRange::only(key)
    }

    pub fn lower_bound(&self, lower: impl Into<Key>, open: bool) -> KeyRange {
        KeyRange::lower_bound(lower, open)
    }

    pub fn upper_bound(&self, upper: impl Into<Key>, open: bool) -> KeyRange {
        KeyRange::upper_bound(upper, open)
    }

    pub fn bound(
        &self,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> KeyRange {
        KeyRange::bound(lower, upper, lower_open, upper_open)
    }
}
