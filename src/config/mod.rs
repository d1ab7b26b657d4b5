pub mod schema;

pub use schema::{
    CookieExpiry, SameSiteMode, SessionConfig, DEFAULT_COOKIE_NAME, DEFAULT_EXPIRES_SECS,
    DEFAULT_GC_INTERVAL_SECS, DEFAULT_SESSION_LIFETIME_SECS, MAX_DURATION_SECS,
};
