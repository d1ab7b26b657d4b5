//! Error taxonomy for the session engine.

use thiserror::Error;

/// Errors surfaced by the session engine and the provider registry.
///
/// Backend failures keep their `anyhow` cause chain so callers can log the
/// root cause; everything else is a configuration or resolution problem.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session provider is not set")]
    NoProvider,

    #[error("session provider '{0}' is not registered")]
    ProviderNotRegistered(String),

    #[error("session provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("session provider name must not be empty")]
    InvalidProviderName,

    #[error("failed to initialize session provider '{0}': {1:#}")]
    ProviderInit(String, #[source] anyhow::Error),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("session id generator returned an empty id")]
    EmptySessionId,

    #[error("request cache is disabled by configuration")]
    RequestCacheDisabled,

    #[error("no session store cached for request {0}")]
    NoCachedStore(String),

    #[error("session backend error: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl SessionError {
    /// True for errors caused by wiring or configuration rather than by a
    /// request or a backend round trip.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoProvider
                | Self::ProviderNotRegistered(_)
                | Self::DuplicateProvider(_)
                | Self::InvalidProviderName
                | Self::ProviderInit(..)
                | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
