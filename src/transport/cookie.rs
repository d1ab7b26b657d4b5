use cookie::Cookie;
use std::time::Duration;
use time::OffsetDateTime;

use super::traits::Exchange;
use crate::config::{CookieExpiry, SameSiteMode, SessionConfig};

/// Expiry issued for [`CookieExpiry::Unlimited`] cookies.
const UNLIMITED_COOKIE_LIFETIME: Duration = Duration::from_secs(24 * 365 * 24 * 60 * 60);

/// Expired cookies are back-dated by a full minute so clock skew on the
/// client does not keep them alive.
const EXPIRED_COOKIE_BACKDATE: Duration = Duration::from_secs(60);

/// `now + ttl`, or the unlimited expiry when that is past the calendar range.
fn expires_after(ttl: Duration) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .unwrap_or_else(|| now + UNLIMITED_COOKIE_LIFETIME)
}

/// Attributes applied to every session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub domain: String,
    pub expiry: CookieExpiry,
    pub secure: bool,
    pub same_site: SameSiteMode,
    pub http_only: bool,
}

impl CookieOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            expiry: config.cookie_expiry(),
            secure: config.secure,
            same_site: config.same_site,
            http_only: config.http_only,
        }
    }
}

/// Reads, issues and expires the session cookie on an [`Exchange`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieTransport;

impl CookieTransport {
    pub fn new() -> Self {
        Self
    }

    /// Raw cookie value, or an empty string when absent.
    pub fn get(&self, exchange: &dyn Exchange, name: &str) -> String {
        exchange.request_cookie(name).unwrap_or_default()
    }

    pub fn set(&self, exchange: &mut dyn Exchange, name: &str, value: &str, options: &CookieOptions) {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path("/")
            .same_site(options.same_site.into())
            .http_only(options.http_only);

        if !options.domain.is_empty() {
            builder = builder.domain(options.domain.clone());
        }

        match options.expiry {
            CookieExpiry::Unlimited => {
                builder = builder.expires(OffsetDateTime::now_utc() + UNLIMITED_COOKIE_LIFETIME);
            }
            CookieExpiry::After(ttl) => {
                builder = builder.expires(expires_after(ttl));
            }
            CookieExpiry::Session => {}
        }

        if options.secure && exchange.is_tls() {
            builder = builder.secure(true);
        }

        exchange.set_response_cookie(builder.build());
    }

    /// Expire the cookie on the response and drop it from the request view.
    pub fn delete(&self, exchange: &mut dyn Exchange, name: &str) {
        let expired = Cookie::build((name.to_string(), String::new()))
            .path("/")
            .http_only(true)
            .expires(OffsetDateTime::now_utc() - EXPIRED_COOKIE_BACKDATE)
            .build();

        exchange.set_response_cookie(expired);
        exchange.remove_request_cookie(name);
    }
}
