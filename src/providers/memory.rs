//! In-process session backend.
//!
//! Records live in a mutex-guarded map and carry a last-active timestamp, so
//! the backend is swept like any other. Contents are stored serialized, which
//! keeps every loaded store independent of the record it came from.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::serializer::Base64JsonSerializer;
use super::traits::{downcast_config, Provider, ProviderConfig, SessionSerializer, StoreWriter};
use crate::sessions::{SessionStore, SessionValues};

pub const PROVIDER_NAME: &str = "memory";

#[derive(Clone, Default)]
pub struct MemoryProviderConfig {
    /// Defaults to [`Base64JsonSerializer`].
    pub serializer: Option<Arc<dyn SessionSerializer>>,
}

impl ProviderConfig for MemoryProviderConfig {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Record {
    contents: String,
    last_active: DateTime<Utc>,
}

impl Record {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            contents: String::new(),
            last_active: now,
        }
    }
}

struct MemoryShared {
    records: Mutex<HashMap<String, Record>>,
    serializer: RwLock<Arc<dyn SessionSerializer>>,
}

impl MemoryShared {
    fn serializer(&self) -> Arc<dyn SessionSerializer> {
        Arc::clone(&self.serializer.read())
    }

    fn decode(&self, contents: &str) -> Result<SessionValues> {
        if contents.is_empty() {
            return Ok(SessionValues::new());
        }
        self.serializer().deserialize(contents)
    }
}

#[async_trait]
impl StoreWriter for MemoryShared {
    async fn write(&self, session_id: &str, values: &SessionValues) -> Result<()> {
        let contents = if values.is_empty() {
            String::new()
        } else {
            self.serializer().serialize(values)?
        };

        let mut records = self.records.lock();
        match records.get_mut(session_id) {
            Some(record) => {
                record.contents = contents;
                record.last_active = Utc::now();
            }
            None => tracing::debug!("Session record vanished before save; dropping write"),
        }
        Ok(())
    }
}

pub struct MemoryProvider {
    shared: Arc<MemoryShared>,
    lifetime_secs: AtomicI64,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                records: Mutex::new(HashMap::new()),
                serializer: RwLock::new(Arc::new(Base64JsonSerializer)),
            }),
            lifetime_secs: AtomicI64::new(crate::config::DEFAULT_SESSION_LIFETIME_SECS),
        }
    }

    /// Insert or replace a record with an explicit last-active time.
    /// Used to seed the backend, e.g. when migrating from another store.
    pub fn insert_record(
        &self,
        session_id: &str,
        values: &SessionValues,
        last_active: DateTime<Utc>,
    ) -> Result<()> {
        let contents = if values.is_empty() {
            String::new()
        } else {
            self.shared.serializer().serialize(values)?
        };
        self.shared.records.lock().insert(
            session_id.to_string(),
            Record {
                contents,
                last_active,
            },
        );
        Ok(())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.shared.records.lock().contains_key(session_id)
    }

    pub fn last_active(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.shared
            .records
            .lock()
            .get(session_id)
            .map(|r| r.last_active)
    }

    /// Drop records idle for longer than the lifetime as of `now`. A record
    /// exactly at the cutoff survives.
    fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let lifetime = self.lifetime_secs.load(Ordering::Relaxed);
        // Lifetimes beyond chrono's range never expire anything.
        let Some(cutoff) = ChronoDuration::try_seconds(lifetime)
            .and_then(|lifetime| now.checked_sub_signed(lifetime))
        else {
            return 0;
        };

        let mut records = self.shared.records.lock();
        let before = records.len();
        records.retain(|_, record| record.last_active >= cutoff);
        before - records.len()
    }

    fn store(&self, session_id: &str, contents: &str) -> Result<SessionStore> {
        let values = self.shared.decode(contents)?;
        let writer: Arc<dyn StoreWriter> = self.shared.clone();
        Ok(SessionStore::new(session_id, values, writer))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn init(&self, session_lifetime_secs: i64, config: &dyn ProviderConfig) -> Result<()> {
        let config = downcast_config::<MemoryProviderConfig>(config, PROVIDER_NAME)?;
        if session_lifetime_secs < 0 {
            bail!("memory session lifetime must not be negative, got {session_lifetime_secs}");
        }
        let serializer = config
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(Base64JsonSerializer));
        *self.shared.serializer.write() = serializer;
        self.lifetime_secs
            .store(session_lifetime_secs, Ordering::Relaxed);
        Ok(())
    }

    fn need_gc(&self) -> bool {
        true
    }

    async fn gc(&self) -> Result<usize> {
        Ok(self.remove_expired(Utc::now()))
    }

    async fn read_store(&self, session_id: &str) -> Result<SessionStore> {
        let contents = {
            let mut records = self.shared.records.lock();
            records
                .entry(session_id.to_string())
                .or_insert_with(|| Record::empty(Utc::now()))
                .contents
                .clone()
        };
        self.store(session_id, &contents)
    }

    async fn regenerate(&self, old_id: &str, new_id: &str) -> Result<SessionStore> {
        let contents = {
            let mut records = self.shared.records.lock();
            match records.remove(old_id) {
                Some(old) => {
                    records.insert(
                        new_id.to_string(),
                        Record {
                            contents: old.contents.clone(),
                            last_active: Utc::now(),
                        },
                    );
                    old.contents
                }
                None => records
                    .entry(new_id.to_string())
                    .or_insert_with(|| Record::empty(Utc::now()))
                    .contents
                    .clone(),
            }
        };
        self.store(new_id, &contents)
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        self.shared.records.lock().remove(session_id);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.shared.records.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::JsonSerializer;
    use serde_json::json;

    async fn provider(lifetime_secs: i64) -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider
            .init(lifetime_secs, &MemoryProviderConfig::default())
            .await
            .unwrap();
        provider
    }

    fn values(pairs: &[(&str, serde_json::Value)]) -> SessionValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn read_store_creates_empty_record() {
        let provider = provider(60).await;
        let store = provider.read_store("abc").await.unwrap();
        assert_eq!(store.session_id(), "abc");
        assert!(store.is_empty());
        assert_eq!(provider.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn writes_are_visible_only_after_save() {
        let provider = provider(60).await;

        let store = provider.read_store("abc").await.unwrap();
        store.set("user", "ada");
        assert!(provider.read_store("abc").await.unwrap().get("user").is_none());

        store.save().await.unwrap();
        let reloaded = provider.read_store("abc").await.unwrap();
        assert_eq!(reloaded.get("user"), Some(json!("ada")));
    }

    #[tokio::test]
    async fn regenerate_moves_contents_exclusively() {
        let provider = provider(60).await;
        provider
            .insert_record("old", &values(&[("role", json!("admin"))]), Utc::now())
            .unwrap();

        let store = provider.regenerate("old", "new").await.unwrap();
        assert_eq!(store.session_id(), "new");
        assert_eq!(store.get("role"), Some(json!("admin")));
        assert!(!provider.contains("old"));
        assert!(provider.contains("new"));
        assert_eq!(provider.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn regenerate_without_old_record_starts_fresh() {
        let provider = provider(60).await;
        let store = provider.regenerate("missing", "new").await.unwrap();
        assert!(store.is_empty());
        assert!(provider.contains("new"));
        assert!(!provider.contains("missing"));
    }

    #[tokio::test]
    async fn save_after_regenerate_does_not_resurrect_old_id() {
        let provider = provider(60).await;
        let old = provider.read_store("old").await.unwrap();
        provider.regenerate("old", "new").await.unwrap();

        old.set("k", 1);
        old.save().await.unwrap();
        assert!(!provider.contains("old"));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let provider = provider(60).await;
        provider.read_store("abc").await.unwrap();
        provider.destroy("abc").await.unwrap();
        provider.destroy("abc").await.unwrap();
        assert_eq!(provider.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gc_removes_only_records_past_lifetime() {
        let provider = provider(5).await;
        let now = Utc::now();
        let empty = SessionValues::new();
        provider
            .insert_record("stale", &empty, now - ChronoDuration::seconds(10))
            .unwrap();
        provider
            .insert_record("edge", &empty, now - ChronoDuration::seconds(3))
            .unwrap();
        provider.insert_record("fresh", &empty, now).unwrap();

        assert_eq!(provider.gc().await.unwrap(), 1);
        assert!(!provider.contains("stale"));
        assert!(provider.contains("edge"));
        assert!(provider.contains("fresh"));
    }

    #[tokio::test]
    async fn record_exactly_at_cutoff_survives() {
        let provider = provider(5).await;
        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(5);
        let empty = SessionValues::new();
        provider.insert_record("at-cutoff", &empty, cutoff).unwrap();
        provider
            .insert_record("just-past", &empty, cutoff - ChronoDuration::milliseconds(1))
            .unwrap();

        assert_eq!(provider.remove_expired(now), 1);
        assert!(provider.contains("at-cutoff"));
        assert!(!provider.contains("just-past"));
    }

    #[tokio::test]
    async fn init_rejects_negative_lifetime() {
        let provider = MemoryProvider::new();
        let err = provider
            .init(-5, &MemoryProviderConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[tokio::test]
    async fn huge_lifetime_expires_nothing() {
        let provider = provider(i64::MAX).await;
        provider
            .insert_record("ancient", &SessionValues::new(), DateTime::<Utc>::MIN_UTC)
            .unwrap();

        assert_eq!(provider.gc().await.unwrap(), 0);
        assert!(provider.contains("ancient"));
    }

    #[tokio::test]
    async fn save_refreshes_last_active() {
        let provider = provider(5).await;
        let long_ago = Utc::now() - ChronoDuration::seconds(100);
        provider
            .insert_record("abc", &SessionValues::new(), long_ago)
            .unwrap();

        let store = provider.read_store("abc").await.unwrap();
        store.save().await.unwrap();
        assert!(provider.last_active("abc").unwrap() > long_ago);
        assert_eq!(provider.gc().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn init_rejects_foreign_config() {
        let provider = MemoryProvider::new();
        let err = provider
            .init(60, &crate::providers::SqliteProviderConfig::in_memory())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[tokio::test]
    async fn custom_serializer_is_used() {
        let provider = MemoryProvider::new();
        provider
            .init(
                60,
                &MemoryProviderConfig {
                    serializer: Some(Arc::new(JsonSerializer)),
                },
            )
            .await
            .unwrap();

        let store = provider.read_store("abc").await.unwrap();
        store.set("n", 1);
        store.save().await.unwrap();
        assert_eq!(
            provider.shared.records.lock()["abc"].contents,
            r#"{"n":1}"#
        );
    }
}
