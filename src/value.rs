//! The settings bag that crosses every backend boundary.
//!
//! A [`ValueSet`] is a flat, string-keyed map of JSON values.  Both backends
//! marshal their native result shape into it; nothing else is returned from a
//! unit processor verb.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat string-keyed settings map.
///
/// Ordering of keys is irrelevant to equality; a `BTreeMap` keeps output
/// deterministic.
///
/// # Examples
///
/// ```
/// use dsc_processor::value::ValueSet;
///
/// let mut settings = ValueSet::new();
/// settings.insert("DestinationPath", "C:/x/f.txt");
/// settings.insert("Ensure", "Present");
///
/// assert_eq!(settings.len(), 2);
/// assert_eq!(
///     settings.get_ignore_case("destinationpath").and_then(|v| v.as_str()),
///     Some("C:/x/f.txt")
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSet(BTreeMap<String, Value>);

impl ValueSet {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Exact-case lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Case-insensitive lookup; an exact match wins over a folded one.
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<&Value> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Convert into a JSON object.
    #[must_use]
    pub fn into_json(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }

    /// Compact JSON text, as passed on a command line.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        // Serializing a map of `Value`s cannot fail.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Build from a JSON value; anything other than an object yields `None`.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for ValueSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for ValueSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ValueSet {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

/// The shape a backend's native result arrives in, before normalisation.
///
/// Script-based resources hand back a hashtable; class-based resources hand
/// back an object whose properties carry the state.  The unit processor only
/// ever sees the [`ValueSet`] produced by [`NativeResult::into_value_set`].
#[derive(Debug, Clone, PartialEq)]
pub enum NativeResult {
    /// A key/value table (script resources, JSON objects).
    Table(Map<String, Value>),
    /// An object: a type name plus ordered properties (class resources).
    Object {
        /// Runtime type name of the object.
        type_name: Option<String>,
        /// Property name/value pairs in declaration order.
        properties: Vec<(String, Value)>,
    },
}

impl NativeResult {
    /// Normalise into the canonical settings bag.
    #[must_use]
    pub fn into_value_set(self) -> ValueSet {
        match self {
            Self::Table(map) => map.into(),
            Self::Object { properties, .. } => properties.into_iter().collect(),
        }
    }

    /// Look up a property or key, case-insensitively.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Table(map) => map
                .get(name)
                .or_else(|| {
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v)
                }),
            Self::Object { properties, .. } => properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
        }
    }

    /// Look up a field that must be a boolean; `None` when missing or of
    /// another type.
    #[must_use]
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }
}
