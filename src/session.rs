//! The session entity.
//!
//! A [`Session`] is the mutable, per-name state a handler reads and writes
//! during a request. Stores create sessions and the registry hands out shared
//! [`SessionHandle`]s so every lookup within a request observes the same state.
//!
//! # Values
//! Values are kept as a map of string keys to [`serde_json::Value`]. Typed
//! access goes through serde with [`Session::get`] and [`Session::insert`];
//! the codec only ever sees the JSON form.
//!
//! # Flashes
//! A flash is a message that survives exactly one read. Flashes are queued in
//! `values` under [`FLASH_KEY`] (or a custom key) and [`Session::flashes`]
//! drains the queue.
//!
//! ```rust
//! # use gosub_sessions::codec::KeyPair;
//! # use gosub_sessions::session::Session;
//! # use gosub_sessions::store::{CookieStore, StoreHandle};
//! # fn main() -> Result<(), gosub_sessions::SessionError> {
//! # let store: StoreHandle = CookieStore::new(&[KeyPair::new(b"secret-key".to_vec())])?;
//! let mut session = Session::new(&store, "session");
//! session.add_flash("saved")?;
//! assert_eq!(session.flashes(), vec![serde_json::json!("saved")]);
//! assert!(session.flashes().is_empty());
//! # Ok(())
//! # }
//! ```

use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::config::{Options, FLASH_KEY};
use crate::errors::SessionError;
use crate::store::{Store, StoreHandle};

/// Session payload: string keys to JSON values.
pub type Values = HashMap<String, Value>;

/// Shared, lockable handle to a session. Readers take a read lock, mutations a write lock.
pub type SessionHandle = Arc<RwLock<Session>>;

pub struct Session {
    name: String,
    /// Server-side id for stores that keep the payload out of the cookie. Empty until first save.
    pub id: String,
    pub values: Values,
    /// Private copy of the store defaults taken when the session was created.
    pub options: Options,
    /// True unless the session was decoded from existing client or server state.
    pub is_new: bool,
    store: Weak<dyn Store>,
}

impl Session {
    /// Creates an empty session owned by `store`, snapshotting the store's default options.
    pub fn new(store: &StoreHandle, name: &str) -> Self {
        Self::with_options(Arc::downgrade(store), name, store.options())
    }

    pub(crate) fn with_options(store: Weak<dyn Store>, name: &str, options: Options) -> Self {
        Session {
            name: name.to_string(),
            id: String::new(),
            values: Values::new(),
            options,
            is_new: true,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning store, if it is still alive.
    pub fn store(&self) -> Option<StoreHandle> {
        self.store.upgrade()
    }

    /// Wraps the session into a shared handle.
    pub fn into_handle(self) -> SessionHandle {
        Arc::new(RwLock::new(self))
    }

    /// Reads `key` as `T`. Returns `Ok(None)` if the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| SessionError::Value(e.to_string()))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value).map_err(|e| SessionError::Value(e.to_string()))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Queues a flash message under the default flash key.
    pub fn add_flash<T: Serialize>(&mut self, value: T) -> Result<(), SessionError> {
        self.add_flash_to(FLASH_KEY, value)
    }

    /// Queues a flash message under `key`.
    pub fn add_flash_to<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value).map_err(|e| SessionError::Value(e.to_string()))?;
        match self.values.get_mut(key) {
            Some(Value::Array(queue)) => queue.push(value),
            _ => {
                self.values.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
        Ok(())
    }

    /// Drains the default flash queue.
    pub fn flashes(&mut self) -> Vec<Value> {
        self.flashes_from(FLASH_KEY)
    }

    /// Drains the flash queue stored under `key`. A second call returns nothing.
    pub fn flashes_from(&mut self, key: &str) -> Vec<Value> {
        match self.values.remove(key) {
            Some(Value::Array(queue)) => queue,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }

    /// Persists this session through its store, adding a `Set-Cookie` to `response`.
    pub fn save(&mut self, request: &HeaderMap, response: &mut HeaderMap) -> Result<(), SessionError> {
        let store = self.store().ok_or_else(|| SessionError::StoreDropped(self.name.clone()))?;
        store.save(request, response, self)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("values", &self.values)
            .field("options", &self.options)
            .field("is_new", &self.is_new)
            .field("store", &self.store().map(|s| s.id()))
            .finish()
    }
}
