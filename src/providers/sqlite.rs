//! Relational session backend on SQLite.
//!
//! Table layout:
//!
//! ```sql
//! CREATE TABLE session (
//!     session_id  TEXT PRIMARY KEY,
//!     contents    TEXT NOT NULL DEFAULT '',
//!     last_active INTEGER NOT NULL DEFAULT 0   -- unix seconds
//! );
//! CREATE INDEX session_last_active ON session (last_active);
//! ```
//!
//! The connection sits behind a mutex and every statement runs on the
//! blocking pool, so sweeps and request traffic serialize on the connection.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::serializer::Base64JsonSerializer;
use super::traits::{downcast_config, Provider, ProviderConfig, SessionSerializer, StoreWriter};
use crate::sessions::{SessionStore, SessionValues};

pub const PROVIDER_NAME: &str = "sqlite";
pub const DEFAULT_TABLE_NAME: &str = "session";

const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Clone)]
pub struct SqliteProviderConfig {
    /// Database file, or `:memory:`.
    pub path: PathBuf,
    pub table_name: String,
    /// Defaults to [`Base64JsonSerializer`].
    pub serializer: Option<Arc<dyn SessionSerializer>>,
    /// When false, a missing database file is an init error instead of
    /// being created.
    pub create_if_missing: bool,
}

impl SqliteProviderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table_name: DEFAULT_TABLE_NAME.into(),
            serializer: None,
            create_if_missing: true,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            bail!("session sqlite provider init error, config path must not be empty");
        }
        if !is_identifier(&self.table_name) {
            bail!(
                "session sqlite provider init error, table name '{}' is not a valid identifier",
                self.table_name
            );
        }
        Ok(())
    }
}

impl ProviderConfig for SqliteProviderConfig {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct SqliteState {
    conn: Mutex<Connection>,
    table: String,
    lifetime_secs: i64,
    serializer: Arc<dyn SessionSerializer>,
}

impl SqliteState {
    fn open(
        path: &Path,
        create_if_missing: bool,
        table: &str,
        lifetime_secs: i64,
        serializer: Arc<dyn SessionSerializer>,
    ) -> Result<Self> {
        let conn = if path.as_os_str() == IN_MEMORY_PATH {
            Connection::open_in_memory()
        } else if create_if_missing {
            Connection::open(path)
        } else {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .with_context(|| format!("Failed to open session database {}", path.display()))?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                session_id  TEXT PRIMARY KEY,
                contents    TEXT NOT NULL DEFAULT '',
                last_active INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS {table}_last_active ON {table} (last_active);"
        ))
        .context("Failed to create session table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            lifetime_secs,
            serializer,
        })
    }

    /// Delete records idle for longer than the lifetime as of `now_secs`.
    /// A record exactly at the cutoff survives.
    fn remove_expired(&self, now_secs: i64) -> Result<usize> {
        let cutoff = now_secs.saturating_sub(self.lifetime_secs);
        let conn = self.conn.lock();
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE last_active < ?1", self.table),
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn decode(&self, contents: &str) -> Result<SessionValues> {
        if contents.is_empty() {
            return Ok(SessionValues::new());
        }
        self.serializer.deserialize(contents)
    }

    /// Fetch contents, inserting an empty record when missing.
    fn read_or_create(&self, session_id: &str) -> Result<String> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (session_id, contents, last_active) VALUES (?1, '', ?2)",
                self.table
            ),
            params![session_id, Utc::now().timestamp()],
        )?;
        let contents = conn.query_row(
            &format!("SELECT contents FROM {} WHERE session_id = ?1", self.table),
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(contents)
    }

    fn migrate(&self, old_id: &str, new_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let contents: Option<String> = tx
            .query_row(
                &format!("SELECT contents FROM {} WHERE session_id = ?1", self.table),
                params![old_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(contents) = contents else {
            return Ok(None);
        };

        tx.execute(
            &format!("DELETE FROM {} WHERE session_id = ?1", self.table),
            params![old_id],
        )?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (session_id, contents, last_active) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![new_id, contents, Utc::now().timestamp()],
        )?;
        tx.commit()?;
        Ok(Some(contents))
    }
}

struct SqliteWriter {
    state: Arc<SqliteState>,
}

#[async_trait]
impl StoreWriter for SqliteWriter {
    async fn write(&self, session_id: &str, values: &SessionValues) -> Result<()> {
        let contents = if values.is_empty() {
            String::new()
        } else {
            self.state.serializer.serialize(values)?
        };
        let session_id = session_id.to_string();

        let updated = blocking(&self.state, move |state| {
            let conn = state.conn.lock();
            let updated = conn.execute(
                &format!(
                    "UPDATE {} SET contents = ?1, last_active = ?2 WHERE session_id = ?3",
                    state.table
                ),
                params![contents, Utc::now().timestamp(), session_id],
            )?;
            Ok(updated)
        })
        .await?;

        if updated == 0 {
            tracing::debug!("Session record vanished before save; dropping write");
        }
        Ok(())
    }
}

async fn blocking<T, F>(state: &Arc<SqliteState>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SqliteState) -> Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .context("sqlite session task failed")?
}

pub struct SqliteProvider {
    state: RwLock<Option<Arc<SqliteState>>>,
}

impl SqliteProvider {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    fn state(&self) -> Result<Arc<SqliteState>> {
        match self.state.read().as_ref() {
            Some(state) => Ok(Arc::clone(state)),
            None => bail!("session sqlite provider is not initialized"),
        }
    }

    fn store(state: &Arc<SqliteState>, session_id: &str, contents: &str) -> Result<SessionStore> {
        let values = state.decode(contents)?;
        let writer: Arc<dyn StoreWriter> = Arc::new(SqliteWriter {
            state: Arc::clone(state),
        });
        Ok(SessionStore::new(session_id, values, writer))
    }
}

impl Default for SqliteProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn init(&self, session_lifetime_secs: i64, config: &dyn ProviderConfig) -> Result<()> {
        let config = downcast_config::<SqliteProviderConfig>(config, PROVIDER_NAME)?;
        config.validate()?;
        if session_lifetime_secs < 0 {
            bail!("session sqlite provider init error, lifetime must not be negative, got {session_lifetime_secs}");
        }

        let path = config.path.clone();
        let create_if_missing = config.create_if_missing;
        let table = config.table_name.clone();
        let serializer = config
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(Base64JsonSerializer));

        let state = tokio::task::spawn_blocking(move || {
            SqliteState::open(&path, create_if_missing, &table, session_lifetime_secs, serializer)
        })
        .await
        .context("sqlite session init task failed")??;

        tracing::info!(
            path = %config.path.display(),
            table = %config.table_name,
            "Session sqlite provider ready"
        );
        *self.state.write() = Some(Arc::new(state));
        Ok(())
    }

    fn need_gc(&self) -> bool {
        true
    }

    async fn gc(&self) -> Result<usize> {
        let state = self.state()?;
        blocking(&state, |state| state.remove_expired(Utc::now().timestamp())).await
    }

    async fn read_store(&self, session_id: &str) -> Result<SessionStore> {
        let state = self.state()?;
        let id = session_id.to_string();
        let contents = blocking(&state, move |state| state.read_or_create(&id)).await?;
        Self::store(&state, session_id, &contents)
    }

    async fn regenerate(&self, old_id: &str, new_id: &str) -> Result<SessionStore> {
        let state = self.state()?;
        let (old, new) = (old_id.to_string(), new_id.to_string());
        let moved = blocking(&state, move |state| state.migrate(&old, &new)).await?;
        match moved {
            Some(contents) => Self::store(&state, new_id, &contents),
            None => self.read_store(new_id).await,
        }
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        let state = self.state()?;
        let id = session_id.to_string();
        blocking(&state, move |state| {
            let conn = state.conn.lock();
            conn.execute(
                &format!("DELETE FROM {} WHERE session_id = ?1", state.table),
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state()?;
        blocking(&state, |state| {
            let conn = state.conn.lock();
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", state.table),
                [],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn provider(lifetime_secs: i64) -> SqliteProvider {
        let provider = SqliteProvider::new();
        provider
            .init(lifetime_secs, &SqliteProviderConfig::in_memory())
            .await
            .unwrap();
        provider
    }

    fn set_last_active(provider: &SqliteProvider, session_id: &str, ts: i64) {
        let state = provider.state().unwrap();
        let conn = state.conn.lock();
        conn.execute(
            "UPDATE session SET last_active = ?1 WHERE session_id = ?2",
            params![ts, session_id],
        )
        .unwrap();
    }

    fn exists(provider: &SqliteProvider, session_id: &str) -> bool {
        let state = provider.state().unwrap();
        let conn = state.conn.lock();
        conn.query_row(
            "SELECT 1 FROM session WHERE session_id = ?1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()
        .unwrap()
        .is_some()
    }

    #[tokio::test]
    async fn operations_before_init_fail() {
        let provider = SqliteProvider::new();
        assert!(provider.read_store("abc").await.is_err());
        assert!(provider.count().await.is_err());
    }

    #[tokio::test]
    async fn init_validates_config() {
        let provider = SqliteProvider::new();
        let bad_table = SqliteProviderConfig::in_memory().with_table_name("session; DROP");
        assert!(provider.init(60, &bad_table).await.is_err());

        let no_path = SqliteProviderConfig::new("");
        assert!(provider.init(60, &no_path).await.is_err());

        let foreign = crate::providers::MemoryProviderConfig::default();
        assert!(provider.init(60, &foreign).await.is_err());
    }

    #[tokio::test]
    async fn save_then_reload_round_trips() {
        let provider = provider(60).await;
        let store = provider.read_store("abc").await.unwrap();
        assert!(store.is_empty());

        store.set("user", "ada");
        store.set("visits", 3);
        store.save().await.unwrap();

        let reloaded = provider.read_store("abc").await.unwrap();
        assert_eq!(reloaded.get("user"), Some(json!("ada")));
        assert_eq!(reloaded.get_as::<i64>("visits").unwrap(), Some(3));
        assert_eq!(provider.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unsaved_changes_never_reach_the_table() {
        let provider = provider(60).await;
        let store = provider.read_store("abc").await.unwrap();
        store.set("user", "ada");
        drop(store);

        assert!(provider.read_store("abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn regenerate_migrates_and_deletes_old_row() {
        let provider = provider(60).await;
        let store = provider.read_store("old").await.unwrap();
        store.set("role", "admin");
        store.save().await.unwrap();

        let moved = provider.regenerate("old", "new").await.unwrap();
        assert_eq!(moved.session_id(), "new");
        assert_eq!(moved.get("role"), Some(json!("admin")));
        assert!(!exists(&provider, "old"));
        assert!(exists(&provider, "new"));
    }

    #[tokio::test]
    async fn regenerate_unknown_old_id_creates_fresh_record() {
        let provider = provider(60).await;
        let store = provider.regenerate("ghost", "new").await.unwrap();
        assert!(store.is_empty());
        assert!(exists(&provider, "new"));
        assert_eq!(provider.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn destroy_missing_record_is_ok() {
        let provider = provider(60).await;
        provider.destroy("nope").await.unwrap();
        provider.read_store("abc").await.unwrap();
        provider.destroy("abc").await.unwrap();
        assert_eq!(provider.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gc_uses_strict_cutoff() {
        let provider = provider(5).await;
        let now = Utc::now().timestamp();
        for id in ["stale", "fresh", "recent"] {
            provider.read_store(id).await.unwrap();
        }
        set_last_active(&provider, "stale", now - 10);
        set_last_active(&provider, "recent", now - 2);

        assert_eq!(provider.gc().await.unwrap(), 1);
        assert!(!exists(&provider, "stale"));
        assert!(exists(&provider, "recent"));
        assert!(exists(&provider, "fresh"));
    }

    #[tokio::test]
    async fn record_exactly_at_cutoff_survives() {
        let provider = provider(5).await;
        let now = Utc::now().timestamp();
        for id in ["at-cutoff", "just-past"] {
            provider.read_store(id).await.unwrap();
        }
        set_last_active(&provider, "at-cutoff", now - 5);
        set_last_active(&provider, "just-past", now - 6);

        let state = provider.state().unwrap();
        assert_eq!(state.remove_expired(now).unwrap(), 1);
        assert!(exists(&provider, "at-cutoff"));
        assert!(!exists(&provider, "just-past"));
    }

    #[tokio::test]
    async fn init_rejects_negative_lifetime() {
        let provider = SqliteProvider::new();
        let err = provider
            .init(-5, &SqliteProviderConfig::in_memory())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("negative"));
        assert!(provider.count().await.is_err());
    }

    #[tokio::test]
    async fn huge_lifetime_expires_nothing() {
        let provider = provider(i64::MAX).await;
        provider.read_store("ancient").await.unwrap();
        set_last_active(&provider, "ancient", 0);

        assert_eq!(provider.gc().await.unwrap(), 0);
        assert!(exists(&provider, "ancient"));
    }

    #[tokio::test]
    async fn missing_file_is_not_created_when_disallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.db");
        let config = SqliteProviderConfig::new(&path).create_if_missing(false);

        let provider = SqliteProvider::new();
        assert!(provider.init(60, &config).await.is_err());
        assert!(!path.exists());

        std::fs::File::create(&path).unwrap();
        provider.init(60, &config).await.unwrap();
        assert_eq!(provider.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_database_survives_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteProviderConfig::new(dir.path().join("sessions.db"));

        let first = SqliteProvider::new();
        first.init(60, &config).await.unwrap();
        let store = first.read_store("abc").await.unwrap();
        store.set("k", "v");
        store.save().await.unwrap();
        drop(first);

        let second = SqliteProvider::new();
        second.init(60, &config).await.unwrap();
        assert_eq!(
            second.read_store("abc").await.unwrap().get("k"),
            Some(json!("v"))
        );
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("session"));
        assert!(is_identifier("_s2"));
        assert!(!is_identifier("2s"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
