//! Session lifecycle engine.
//!
//! Per request: resolve the token from the exchange (cookie, then query,
//! then header), mint one if absent, load the store from the active provider,
//! re-issue the cookie/header, and remember the store for the rest of the
//! request. Persistence is the caller's job via [`SessionStore::save`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::cache::RequestCache;
use super::store::SessionStore;
use super::sweep::SweepTask;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::identity::{redact, RequestId};
use crate::providers::{Provider, ProviderConfig, ProviderRegistry};
use crate::transport::{CookieOptions, CookieTransport, Exchange};

pub struct SessionManager {
    config: SessionConfig,
    cookie: CookieTransport,
    cookie_options: CookieOptions,
    registry: Arc<ProviderRegistry>,
    provider: Option<Arc<dyn Provider>>,
    cache: RequestCache,
    sweep: Mutex<Option<SweepTask>>,
    degraded: Arc<AtomicBool>,
}

impl SessionManager {
    /// Build a manager over `registry`. Unset config fields take their
    /// defaults; an invalid config is rejected.
    pub fn new(mut config: SessionConfig, registry: Arc<ProviderRegistry>) -> Result<Self> {
        config.normalize();
        config
            .validate()
            .map_err(|e| SessionError::InvalidConfig(format!("{e:#}")))?;

        Ok(Self {
            cookie_options: CookieOptions::from_config(&config),
            config,
            cookie: CookieTransport::new(),
            registry,
            provider: None,
            cache: RequestCache::new(),
            sweep: Mutex::new(None),
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_cookie_name(&mut self, cookie_name: &str) {
        let cookie_name = cookie_name.trim();
        if !cookie_name.is_empty() {
            self.config.cookie_name = cookie_name.to_string();
        }
    }

    pub fn set_request_cache(&mut self, enabled: bool) {
        self.config.request_cache = enabled;
    }

    /// Activate the provider registered as `name`, replacing any previous
    /// one. Starts the background sweep when the provider needs it.
    pub async fn set_provider(&mut self, name: &str, provider_config: &dyn ProviderConfig) -> Result<()> {
        let provider = self
            .registry
            .lookup(name)
            .ok_or_else(|| SessionError::ProviderNotRegistered(name.to_string()))?;

        provider
            .init(self.config.session_lifetime_secs, provider_config)
            .await
            .map_err(|e| SessionError::ProviderInit(name.to_string(), e))?;

        if let Some(previous) = self.sweep.get_mut().take() {
            previous.stop().await;
        }
        self.degraded.store(false, Ordering::SeqCst);

        if provider.need_gc() {
            let task = SweepTask::spawn(
                Arc::clone(&provider),
                self.config.gc_interval(),
                Arc::clone(&self.degraded),
            );
            *self.sweep.get_mut() = Some(task);
        }

        tracing::info!(
            provider = name,
            lifetime_secs = self.config.session_lifetime_secs,
            "Session provider active"
        );
        self.provider = Some(provider);
        Ok(())
    }

    pub fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.provider.clone()
    }

    fn active_provider(&self) -> Result<Arc<dyn Provider>> {
        self.provider.clone().ok_or(SessionError::NoProvider)
    }

    /// Resolve or mint the session id, load its store and re-issue the
    /// token to the client.
    pub async fn start(&self, exchange: &mut dyn Exchange) -> Result<Arc<SessionStore>> {
        let provider = self.active_provider()?;

        let mut session_id = self.session_id(&*exchange);
        if session_id.is_empty() {
            session_id = self.mint_session_id()?;
        }

        let store = provider
            .read_store(&session_id)
            .await
            .map_err(|e| backend_error(e, "load", &session_id))?;
        let store = Arc::new(store);

        self.issue_token(exchange, &session_id);
        if self.config.request_cache {
            self.cache
                .insert(exchange.request_id().clone(), Arc::clone(&store));
        }

        tracing::debug!(
            request_id = %exchange.request_id(),
            session = %redact(&session_id),
            "Session started"
        );
        Ok(store)
    }

    /// Session id presented by the client, decoded. The first non-empty
    /// source wins: cookie, then query parameter, then header. Empty when
    /// none is present or the token does not decode.
    pub fn session_id(&self, exchange: &dyn Exchange) -> String {
        let token = self.cookie.get(exchange, &self.config.cookie_name);
        if !token.is_empty() {
            return self.config.decode_token(&token);
        }

        if self.config.session_id_in_query {
            if let Some(token) = exchange.query_param(&self.config.query_name) {
                if !token.is_empty() {
                    return self.config.decode_token(&token);
                }
            }
        }

        if self.config.session_id_in_header {
            if let Some(token) = exchange.request_header(&self.config.header_name) {
                if !token.is_empty() {
                    return self.config.decode_token(&token);
                }
            }
        }

        String::new()
    }

    /// Move the session to a freshly minted id, e.g. after login. The old id
    /// stops resolving.
    pub async fn regenerate(&self, exchange: &mut dyn Exchange) -> Result<Arc<SessionStore>> {
        let provider = self.active_provider()?;
        let session_id = self.mint_session_id()?;
        let old_id = self.session_id(&*exchange);

        let store = if old_id.is_empty() {
            provider.read_store(&session_id).await
        } else {
            provider.regenerate(&old_id, &session_id).await
        }
        .map_err(|e| backend_error(e, "regenerate", &session_id))?;
        let store = Arc::new(store);

        self.issue_token(exchange, &session_id);
        if self.config.request_cache {
            self.cache
                .insert(exchange.request_id().clone(), Arc::clone(&store));
        }

        tracing::debug!(
            request_id = %exchange.request_id(),
            old = %redact(&old_id),
            session = %redact(&session_id),
            "Session regenerated"
        );
        Ok(store)
    }

    /// Delete the client's session and expire its cookie. A request without
    /// a session cookie is a no-op.
    pub async fn destroy(&self, exchange: &mut dyn Exchange) -> Result<()> {
        if self.config.request_cache {
            self.cache.remove(exchange.request_id());
        }

        if self.config.session_id_in_header {
            exchange.remove_request_header(&self.config.header_name);
            exchange.remove_response_header(&self.config.header_name);
        }

        let token = self.cookie.get(&*exchange, &self.config.cookie_name);
        if token.is_empty() {
            return Ok(());
        }

        let session_id = self.config.decode_token(&token);
        if !session_id.is_empty() {
            let provider = self.active_provider()?;
            provider
                .destroy(&session_id)
                .await
                .map_err(|e| backend_error(e, "destroy", &session_id))?;
        }

        self.cookie.delete(exchange, &self.config.cookie_name);
        tracing::debug!(
            request_id = %exchange.request_id(),
            session = %redact(&session_id),
            "Session destroyed"
        );
        Ok(())
    }

    // ── Per-request cache ──────────────────────────────────────────

    pub fn cached_store(&self, request_id: &RequestId) -> Result<Arc<SessionStore>> {
        self.ensure_request_cache()?;
        self.cache
            .get(request_id)
            .ok_or_else(|| SessionError::NoCachedStore(request_id.to_string()))
    }

    pub fn cache_store(&self, request_id: &RequestId, store: Arc<SessionStore>) -> Result<()> {
        self.ensure_request_cache()?;
        self.cache.insert(request_id.clone(), store);
        Ok(())
    }

    /// Drop the cache entry for a finished request, returning it.
    pub fn remove_cached_store(&self, request_id: &RequestId) -> Result<Arc<SessionStore>> {
        self.ensure_request_cache()?;
        self.cache
            .remove(request_id)
            .ok_or_else(|| SessionError::NoCachedStore(request_id.to_string()))
    }

    pub fn cached_requests(&self) -> usize {
        self.cache.len()
    }

    fn ensure_request_cache(&self) -> Result<()> {
        if self.config.request_cache {
            Ok(())
        } else {
            Err(SessionError::RequestCacheDisabled)
        }
    }

    // ── Background sweep ───────────────────────────────────────────

    pub fn sweep_running(&self) -> bool {
        self.sweep
            .lock()
            .as_ref()
            .is_some_and(SweepTask::is_running)
    }

    /// True once a sweep has failed; expired sessions are no longer removed
    /// until a provider is set again.
    pub fn sweep_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Stop the background sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        let task = self.sweep.lock().take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Session sweep shut down");
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn mint_session_id(&self) -> Result<String> {
        let session_id = self.config.generate_session_id();
        if session_id.is_empty() {
            tracing::error!(
                generator = self.config.id_generator.name(),
                "Session id generator returned an empty id"
            );
            return Err(SessionError::EmptySessionId);
        }
        Ok(session_id)
    }

    fn issue_token(&self, exchange: &mut dyn Exchange, session_id: &str) {
        let token = self.config.encode_token(session_id);
        self.cookie
            .set(exchange, &self.config.cookie_name, &token, &self.cookie_options);

        if self.config.session_id_in_header {
            exchange.set_request_header(&self.config.header_name, &token);
            exchange.set_response_header(&self.config.header_name, &token);
        }
    }
}

fn backend_error(e: anyhow::Error, action: &str, session_id: &str) -> SessionError {
    SessionError::Backend(e.context(format!("failed to {action} session {}", redact(session_id))))
}
