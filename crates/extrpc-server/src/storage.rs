//! `save` and `get` procedures over a callback-style key/value area.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RegistryError;
use crate::registry::ProcedureRegistry;

/// Name of the procedure persisting a key/value bundle.
pub const SAVE_PROCEDURE: &str = "save";
/// Name of the procedure reading one key.
pub const GET_PROCEDURE: &str = "get";

/// In-memory stand-in for the extension's local storage area.
///
/// Like the engine API it completes operations through callbacks.
#[derive(Debug, Clone, Default)]
pub struct StorageArea {
    items: Arc<Mutex<Map<String, Value>>>,
}

impl StorageArea {
    /// Creates an empty storage area.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every entry of `items`, then calls `done`.
    pub fn set<F>(&self, items: Map<String, Value>, done: F)
    where
        F: FnOnce(),
    {
        self.lock().extend(items);
        done();
    }

    /// Looks up `keys` and calls `found` with the entries that exist.
    pub fn get<F>(&self, keys: &[&str], found: F)
    where
        F: FnOnce(Map<String, Value>),
    {
        let items = self.lock();
        let hits = keys
            .iter()
            .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();
        drop(items);
        found(hits);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Deserialize)]
struct GetArgs {
    key: String,
}

/// Registers `save` and `get` on `registry`, backed by `storage`.
///
/// `save` takes an object of key/value pairs and returns `true`. `get` takes
/// `{"key": ...}` and returns the stored value, or `null` when absent.
pub fn register_storage_procedures(
    registry: &mut ProcedureRegistry,
    storage: StorageArea,
) -> Result<(), RegistryError> {
    let area = storage.clone();
    registry.register_callback_procedure(SAVE_PROCEDURE, move |args, resolver| {
        let Value::Object(items) = args else {
            resolver.reject("save expects an object of key/value pairs");
            return;
        };
        let keys = items.len();
        area.set(items, move || {
            debug!(keys, "saved to storage");
            resolver.resolve(Value::Bool(true));
        });
    })?;

    registry.register_callback_procedure(GET_PROCEDURE, move |args, resolver| {
        let args: GetArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => {
                resolver.reject(e);
                return;
            }
        };
        let key = args.key;
        storage.get(&[key.as_str()], |mut found| {
            resolver.resolve(found.remove(&key).unwrap_or(Value::Null));
        });
    })
}
