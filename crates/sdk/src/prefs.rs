//! Typed preference handles over a [`PreferenceStore`].
//!
//! Each handle names one stored value and carries a persistence policy.
//! `Always` writes through to the underlying store; `Never` keeps the value
//! in process memory only and never touches durable storage — used for
//! deployments that must not persist refresh tokens on the device.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::traits::PreferenceStore;

/// Where a preference value is allowed to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistencePolicy {
    /// Persist to the underlying store.
    Always,
    /// Keep in process memory only; the durable store is never written.
    Never,
}

/// A named string preference.
pub struct StringPreference {
    name: String,
    policy: PersistencePolicy,
    store: Arc<dyn PreferenceStore>,
    memory: Mutex<Option<String>>,
}

impl StringPreference {
    /// Create a handle for `name` with the given policy.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        policy: PersistencePolicy,
        store: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            store,
            memory: Mutex::new(None),
        }
    }

    /// The current value, or `None` if unset.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        match self.policy {
            PersistencePolicy::Always => self.store.get(&self.name),
            PersistencePolicy::Never => self.memory.lock().clone(),
        }
    }

    /// Replace the current value.
    ///
    /// # Errors
    /// Returns an error if the underlying store rejects the write.
    pub fn set(&self, value: &str) -> Result<(), String> {
        match self.policy {
            PersistencePolicy::Always => self.store.set(&self.name, value),
            PersistencePolicy::Never => {
                *self.memory.lock() = Some(value.to_string());
                Ok(())
            }
        }
    }

    /// Remove the current value.
    pub fn clear(&self) {
        match self.policy {
            PersistencePolicy::Always => self.store.clear(&self.name),
            PersistencePolicy::Never => *self.memory.lock() = None,
        }
    }
}

/// A named preference holding a JSON document.
pub struct JsonPreference {
    inner: StringPreference,
}

impl JsonPreference {
    /// Create a handle for `name` with the given policy.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        policy: PersistencePolicy,
        store: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            inner: StringPreference::new(name, policy, store),
        }
    }

    /// The current value as a raw string.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.inner.get()
    }

    /// The current value parsed as JSON; `None` if unset or unparsable.
    #[must_use]
    pub fn get_json(&self) -> Option<Value> {
        self.inner.get().and_then(|raw| serde_json::from_str(&raw).ok())
    }

    /// Replace the current value with a JSON document.
    ///
    /// # Errors
    /// Returns an error if the underlying store rejects the write.
    pub fn set_json(&self, value: &Value) -> Result<(), String> {
        self.inner.set(&value.to_string())
    }

    /// Remove the current value.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

/// An in-memory [`PreferenceStore`].
///
/// The default store for tests and for hosts that manage persistence
/// themselves.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), String> {
        self.values.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, name: &str) {
        self.values.lock().remove(name);
    }
}
