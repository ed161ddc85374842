// Context Value Store
//
// This module provides the layered, immutable variable store threaded through
// template evaluation. Extending a store never mutates it: a new layer is pushed
// on top and lookups fall back to the parent layers.

use crate::value::{EvaluationResult, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Key holding the current base value
pub const BASE_VALUE_KEY: &str = "base";

/// Key holding the active group id
pub const GROUP_ID_KEY: &str = "GROUP_ID";

/// Field-name marker replaced by the active group suffix
pub const KEY_NAME_SUFFIX: &str = "_KEY_NAME_SUFFIX";

#[derive(Debug)]
struct Layer {
    parent: Option<Arc<Layer>>,
    values: HashMap<String, EvaluationResult>,
}

/// Immutable mapping from variable name to a previously resolved result
#[derive(Debug, Clone)]
pub struct ContextValues {
    layer: Arc<Layer>,
}

impl Default for ContextValues {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextValues {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            layer: Arc::new(Layer {
                parent: None,
                values: HashMap::new(),
            }),
        }
    }

    /// Creates a store holding the given entries
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, EvaluationResult)>,
        K: Into<String>,
    {
        Self::new().extend(entries)
    }

    /// Returns a new store with the entries layered on top of this one
    pub fn extend<I, K>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, EvaluationResult)>,
        K: Into<String>,
    {
        let values: HashMap<String, EvaluationResult> = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();

        if values.is_empty() {
            return self.clone();
        }

        Self {
            layer: Arc::new(Layer {
                parent: Some(Arc::clone(&self.layer)),
                values,
            }),
        }
    }

    /// Returns a new store with a single entry added
    pub fn with(&self, key: impl Into<String>, value: EvaluationResult) -> Self {
        self.extend(std::iter::once((key.into(), value)))
    }

    /// Looks up a key, searching the newest layer first
    pub fn get(&self, key: &str) -> Option<&EvaluationResult> {
        let mut current = Some(&self.layer);
        while let Some(layer) = current {
            if let Some(value) = layer.values.get(key) {
                return Some(value);
            }
            current = layer.parent.as_ref();
        }
        None
    }

    /// Looks up a key and returns its value when the result is non-empty
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(EvaluationResult::value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every visible key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        let mut current = Some(&self.layer);
        while let Some(layer) = current {
            keys.extend(layer.values.keys().cloned());
            current = layer.parent.as_ref();
        }
        keys.into_iter().collect()
    }

    /// Active group id, if any
    pub fn group_id(&self) -> Option<String> {
        self.value(GROUP_ID_KEY).and_then(Value::as_text)
    }

    /// Current base value, if any
    pub fn base(&self) -> Option<&Value> {
        self.value(BASE_VALUE_KEY)
    }

    /// Flattens the visible non-empty values into a variable map for scripts
    pub fn to_variables(&self) -> HashMap<String, Value> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                let value = self.value(&key)?.clone();
                Some((key, value))
            })
            .collect()
    }
}
