//! Process-wide parameter store.
//!
//! Every telemetry value the bridge publishes is mirrored here under its
//! topic name so that consumers joining late can read the latest value
//! without waiting for the next change.  The store is a convenience view;
//! the topic channels carry the same values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// A value held in the [`ParamStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<u8> for ParamValue {
    fn from(v: u8) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

/// Shared key/value store. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    values: Arc<RwLock<BTreeMap<String, ParamValue>>>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any previous value.
    pub fn set(&self, name: &str, value: impl Into<ParamValue>) {
        // Entries are replaced whole, so poisoning is ignored.
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(name.to_string(), value.into());
    }

    /// Return the current value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(name).cloned()
    }

    /// Copy of every parameter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, ParamValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
