//! Backend contract for session persistence.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::any::Any;

use crate::sessions::{SessionStore, SessionValues};

/// Backend-specific configuration handed to [`Provider::init`].
///
/// Each backend ships its own config type and rejects configs meant for a
/// different backend.
pub trait ProviderConfig: Any + Send + Sync {
    /// Name of the backend this config is meant for.
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Downcast a config to the concrete type a backend expects.
pub fn downcast_config<'a, T: ProviderConfig>(
    config: &'a dyn ProviderConfig,
    backend: &str,
) -> Result<&'a T> {
    if config.name() != backend {
        bail!(
            "session {backend} provider init error, got config for '{}'",
            config.name()
        );
    }
    match config.as_any().downcast_ref::<T>() {
        Some(config) => Ok(config),
        None => bail!("session {backend} provider init error, unexpected config type"),
    }
}

/// Turns session contents into the string a backend stores, and back.
pub trait SessionSerializer: Send + Sync {
    fn serialize(&self, values: &SessionValues) -> Result<String>;

    fn deserialize(&self, raw: &str) -> Result<SessionValues>;

    fn name(&self) -> &str;
}

/// Write-back seam between a [`SessionStore`] and the backend that loaded it.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    /// Persist `values` as the contents of `session_id` and refresh its
    /// last-active time. Records that no longer exist are not recreated.
    async fn write(&self, session_id: &str, values: &SessionValues) -> Result<()>;
}

/// A session persistence backend.
///
/// One instance is registered per backend name. The engine calls into it
/// from many requests at once and from the background sweep, without any
/// external locking.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Validate `config`, open connections and install the default
    /// serializer when the config carries none.
    async fn init(&self, session_lifetime_secs: i64, config: &dyn ProviderConfig) -> Result<()>;

    /// Whether the engine must sweep this backend periodically.
    fn need_gc(&self) -> bool;

    /// Delete every record whose last-active time is strictly older than
    /// `now - session_lifetime`. Returns the number of records removed.
    async fn gc(&self) -> Result<usize>;

    /// Load `session_id`, creating an empty record if none exists.
    async fn read_store(&self, session_id: &str) -> Result<SessionStore>;

    /// Move the contents of `old_id` to `new_id`. Behaves like
    /// [`Provider::read_store`] on `new_id` when `old_id` has no record.
    async fn regenerate(&self, old_id: &str, new_id: &str) -> Result<SessionStore>;

    /// Delete `session_id`. Absent records are not an error.
    async fn destroy(&self, session_id: &str) -> Result<()>;

    /// Number of live records.
    async fn count(&self) -> Result<usize>;
}
