use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::identity::{IdGenerator, PlainCodec, TokenCodec, UuidV7Generator};

pub const DEFAULT_COOKIE_NAME: &str = "_sessid_";
pub const DEFAULT_EXPIRES_SECS: i64 = 5 * 60 * 60;
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 60;
/// Upper bound for every duration setting (cookie expiry, sweep interval,
/// session lifetime): 100 years.
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

// ── Cookie attributes ─────────────────────────────────────────────

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSiteMode {
    #[default]
    Lax,
    Strict,
    None,
}

impl From<SameSiteMode> for cookie::SameSite {
    fn from(mode: SameSiteMode) -> Self {
        match mode {
            SameSiteMode::Lax => cookie::SameSite::Lax,
            SameSiteMode::Strict => cookie::SameSite::Strict,
            SameSiteMode::None => cookie::SameSite::None,
        }
    }
}

/// How long the user agent keeps the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    /// Far-future expiry; the cookie effectively never lapses.
    Unlimited,
    /// No `Expires` attribute; dropped when the client closes.
    Session,
    /// Absolute expiry this long after the response is issued.
    After(Duration),
}

impl CookieExpiry {
    /// `0` = unlimited, negative = session cookie, positive = TTL in seconds.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => Self::Unlimited,
            s if s < 0 => Self::Session,
            s => Self::After(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

// ── Session config ────────────────────────────────────────────────

/// Session engine configuration (`[session]` in `sessionkeeper.toml`).
///
/// Strategy objects (id generator, token codec) are not serialized; set them
/// with [`SessionConfig::with_id_generator`] / [`SessionConfig::with_token_codec`].
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name of the session cookie. Default: `"_sessid_"`.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Cookie `Domain` attribute. Empty means host-only.
    #[serde(default)]
    pub domain: String,

    /// Cookie lifetime in seconds: `0` never expires, negative expires when
    /// the client closes, positive is an absolute TTL. Default: 5 hours.
    #[serde(default = "default_expires_secs")]
    pub expires_secs: i64,

    /// Seconds between background sweeps. Default: `3`.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Seconds of inactivity after which a backend record is swept.
    /// Default: `60`. `0` falls back to `gc_interval_secs`.
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: i64,

    /// Mark the cookie `Secure`. Only applied on TLS connections.
    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default)]
    pub same_site: SameSiteMode,

    #[serde(default = "default_true")]
    pub http_only: bool,

    /// Also look for the session id in a URL query parameter.
    #[serde(default)]
    pub session_id_in_query: bool,

    #[serde(default)]
    pub query_name: String,

    /// Also look for (and mirror) the session id in an HTTP header.
    #[serde(default)]
    pub session_id_in_header: bool,

    #[serde(default)]
    pub header_name: String,

    /// Keep each request's store in the per-request cache. Default: `true`.
    #[serde(default = "default_true")]
    pub request_cache: bool,

    #[serde(skip, default = "default_id_generator")]
    pub id_generator: Arc<dyn IdGenerator>,

    #[serde(skip, default = "default_token_codec")]
    pub token_codec: Arc<dyn TokenCodec>,
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.into()
}

fn default_expires_secs() -> i64 {
    DEFAULT_EXPIRES_SECS
}

fn default_gc_interval_secs() -> u64 {
    DEFAULT_GC_INTERVAL_SECS
}

fn default_session_lifetime_secs() -> i64 {
    DEFAULT_SESSION_LIFETIME_SECS
}

fn default_true() -> bool {
    true
}

fn default_id_generator() -> Arc<dyn IdGenerator> {
    Arc::new(UuidV7Generator)
}

fn default_token_codec() -> Arc<dyn TokenCodec> {
    Arc::new(PlainCodec)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            domain: String::new(),
            expires_secs: default_expires_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            secure: true,
            same_site: SameSiteMode::default(),
            http_only: true,
            session_id_in_query: false,
            query_name: String::new(),
            session_id_in_header: false,
            header_name: String::new(),
            request_cache: true,
            id_generator: default_id_generator(),
            token_codec: default_token_codec(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("domain", &self.domain)
            .field("expires_secs", &self.expires_secs)
            .field("gc_interval_secs", &self.gc_interval_secs)
            .field("session_lifetime_secs", &self.session_lifetime_secs)
            .field("secure", &self.secure)
            .field("same_site", &self.same_site)
            .field("http_only", &self.http_only)
            .field("session_id_in_query", &self.session_id_in_query)
            .field("query_name", &self.query_name)
            .field("session_id_in_header", &self.session_id_in_header)
            .field("header_name", &self.header_name)
            .field("request_cache", &self.request_cache)
            .field("id_generator", &self.id_generator.name())
            .field("token_codec", &self.token_codec.name())
            .finish()
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    session: SessionConfig,
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw).context("Failed to parse session config")?;
        Ok(file.session)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn with_token_codec(mut self, codec: Arc<dyn TokenCodec>) -> Self {
        self.token_codec = codec;
        self
    }

    /// Fill unset fields with their documented defaults.
    pub fn normalize(&mut self) {
        if self.cookie_name.trim().is_empty() {
            self.cookie_name = default_cookie_name();
        }
        if self.gc_interval_secs == 0 {
            self.gc_interval_secs = default_gc_interval_secs();
        }
        if self.session_lifetime_secs == 0 {
            self.session_lifetime_secs =
                i64::try_from(self.gc_interval_secs).unwrap_or(i64::MAX);
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("SESSIONKEEPER_COOKIE_NAME") {
            if !name.is_empty() {
                self.cookie_name = name;
            }
        }

        if let Ok(domain) = std::env::var("SESSIONKEEPER_DOMAIN") {
            self.domain = domain;
        }

        if let Ok(raw) = std::env::var("SESSIONKEEPER_SESSION_LIFETIME") {
            match raw.parse::<i64>() {
                Ok(secs) => self.session_lifetime_secs = secs,
                Err(e) => tracing::warn!("Ignoring SESSIONKEEPER_SESSION_LIFETIME={raw:?}: {e}"),
            }
        }

        if let Ok(raw) = std::env::var("SESSIONKEEPER_GC_INTERVAL") {
            match raw.parse::<u64>() {
                Ok(secs) => self.gc_interval_secs = secs,
                Err(e) => tracing::warn!("Ignoring SESSIONKEEPER_GC_INTERVAL={raw:?}: {e}"),
            }
        }

        if let Ok(raw) = std::env::var("SESSIONKEEPER_SECURE") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.secure = true,
                "0" | "false" | "no" => self.secure = false,
                _ => tracing::warn!("Ignoring SESSIONKEEPER_SECURE={raw:?}: expected a boolean"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_cookie_token(&self.cookie_name) {
            bail!(
                "cookie_name '{}' is not a valid cookie name",
                self.cookie_name
            );
        }

        if self.domain.chars().any(|c| c.is_whitespace() || c == ';') {
            bail!("domain '{}' contains invalid characters", self.domain);
        }

        if self.session_lifetime_secs < 0 {
            bail!("session_lifetime_secs must not be negative");
        }

        if self.session_lifetime_secs > MAX_DURATION_SECS {
            bail!("session_lifetime_secs must be at most {MAX_DURATION_SECS}");
        }

        if self.expires_secs > MAX_DURATION_SECS {
            bail!("expires_secs must be at most {MAX_DURATION_SECS}");
        }

        if self.gc_interval_secs > MAX_DURATION_SECS.unsigned_abs() {
            bail!("gc_interval_secs must be at most {MAX_DURATION_SECS}");
        }

        if self.session_id_in_query && self.query_name.trim().is_empty() {
            bail!("session_id_in_query is enabled but query_name is empty");
        }

        if self.session_id_in_header {
            if self.header_name.trim().is_empty() {
                bail!("session_id_in_header is enabled but header_name is empty");
            }
            axum::http::HeaderName::from_bytes(self.header_name.as_bytes())
                .with_context(|| format!("header_name '{}' is not a valid header", self.header_name))?;
        }

        Ok(())
    }

    pub fn cookie_expiry(&self) -> CookieExpiry {
        CookieExpiry::from_secs(self.expires_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// Mint a session id with the configured generator.
    pub fn generate_session_id(&self) -> String {
        self.id_generator.generate()
    }

    /// Encode a session id for the wire. A failing codec yields an empty
    /// token, which clients present back as "no session".
    pub fn encode_token(&self, session_id: &str) -> String {
        match self.token_codec.encode(session_id) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(codec = self.token_codec.name(), "Failed to encode session id: {e:#}");
                String::new()
            }
        }
    }

    /// Decode a presented token. Undecodable tokens resolve to an empty id.
    pub fn decode_token(&self, token: &str) -> String {
        if token.is_empty() {
            return String::new();
        }
        match self.token_codec.decode(token) {
            Ok(session_id) => session_id,
            Err(e) => {
                tracing::debug!(codec = self.token_codec.name(), "Discarding undecodable session token: {e:#}");
                String::new()
            }
        }
    }
}

/// RFC 6265 token: visible ASCII minus separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}
