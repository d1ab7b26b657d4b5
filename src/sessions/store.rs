//! Decoded, in-memory view of one session.

use anyhow::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SessionError;
use crate::providers::StoreWriter;

/// Session contents: string keys to arbitrary JSON values.
pub type SessionValues = HashMap<String, Value>;

/// Key/value contents of one session, tagged with its id.
///
/// Mutations stay in memory until [`SessionStore::save`] is called; a store
/// that is dropped unsaved leaves the backend untouched.
pub struct SessionStore {
    session_id: String,
    values: Mutex<SessionValues>,
    writer: Arc<dyn StoreWriter>,
}

impl SessionStore {
    pub fn new(session_id: impl Into<String>, values: SessionValues, writer: Arc<dyn StoreWriter>) -> Self {
        Self {
            session_id: session_id.into(),
            values: Mutex::new(values),
            writer,
        }
    }

    pub fn empty(session_id: impl Into<String>, writer: Arc<dyn StoreWriter>) -> Self {
        Self::new(session_id, SessionValues::new(), writer)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Typed read. `Ok(None)` when the key is absent, an error when the
    /// stored value has a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.lock().insert(key.into(), value.into());
    }

    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    pub fn delete(&self, key: &str) {
        self.values.lock().remove(key);
    }

    /// Snapshot of the current contents.
    pub fn get_all(&self) -> SessionValues {
        self.values.lock().clone()
    }

    pub fn flush(&self) {
        self.values.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Write the current contents back through the backend that loaded this
    /// store.
    pub async fn save(&self) -> Result<(), SessionError> {
        let snapshot = self.get_all();
        self.writer
            .write(&self.session_id, &snapshot)
            .await
            .map_err(SessionError::Backend)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("session_id", &crate::identity::redact(&self.session_id))
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}
