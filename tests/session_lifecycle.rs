//! End-to-end session lifecycle over `http` request/response types.

use axum::http::{header, HeaderValue, Request, Response};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use sessionkeeper::identity::SignedCodec;
use sessionkeeper::providers::{MemoryProviderConfig, SqliteProviderConfig};
use sessionkeeper::{HttpExchange, ProviderRegistry, SessionConfig, SessionError, SessionManager};

async fn sqlite_manager(db: &std::path::Path) -> SessionManager {
    let registry = Arc::new(assert_ok!(ProviderRegistry::with_builtin_providers()));
    let mut manager = assert_ok!(SessionManager::new(SessionConfig::default(), registry));
    assert_ok!(
        manager
            .set_provider("sqlite", &SqliteProviderConfig::new(db))
            .await
    );
    manager
}

/// Client cookie header carrying whatever `Set-Cookie` the response held.
fn cookie_from(response: &Response<()>, name: &str) -> HeaderValue {
    let set_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .expect("response sets the session cookie");
    let pair = set_cookie.split(';').next().unwrap();
    HeaderValue::from_str(pair).unwrap()
}

fn get(cookie: Option<&HeaderValue>) -> Request<()> {
    let mut builder = Request::get("http://app.local/cart");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie.clone());
    }
    builder.body(()).unwrap()
}

#[tokio::test]
async fn login_flow_persists_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir.path().join("sessions.db")).await;

    // First visit: no cookie, a session is minted and persisted.
    let mut ex = HttpExchange::from_request(&get(None));
    let store = assert_ok!(manager.start(&mut ex).await);
    store.set("cart", json!(["apple"]));
    assert_ok!(store.save().await);

    let mut response = Response::new(());
    ex.apply_to(&mut response);
    let cookie = cookie_from(&response, "_sessid_");

    // Second visit resumes the same session.
    let mut ex = HttpExchange::from_request(&get(Some(&cookie)));
    let store = assert_ok!(manager.start(&mut ex).await);
    assert_eq!(store.get("cart"), Some(json!(["apple"])));
    let anonymous_id = store.session_id().to_string();

    // Login rotates the id; contents move with it.
    let regenerated = assert_ok!(manager.regenerate(&mut ex).await);
    assert_ne!(regenerated.session_id(), anonymous_id);
    regenerated.set("user", "ada");
    assert_ok!(regenerated.save().await);

    let mut response = Response::new(());
    ex.apply_to(&mut response);
    let rotated = cookie_from(&response, "_sessid_");

    // The pre-login cookie no longer reaches the old contents.
    let mut stale = HttpExchange::from_request(&get(Some(&cookie)));
    let stale_store = assert_ok!(manager.start(&mut stale).await);
    assert!(stale_store.get("cart").is_none());

    let mut ex = HttpExchange::from_request(&get(Some(&rotated)));
    let store = assert_ok!(manager.start(&mut ex).await);
    assert_eq!(store.get("user"), Some(json!("ada")));
    assert_eq!(store.get("cart"), Some(json!(["apple"])));

    // Logout.
    assert_ok!(manager.destroy(&mut ex).await);
    let mut response = Response::new(());
    ex.apply_to(&mut response);
    let cleared = cookie_from(&response, "_sessid_");
    assert_eq!(cleared.to_str().unwrap(), "_sessid_=");

    let mut ex = HttpExchange::from_request(&get(Some(&rotated)));
    let store = assert_ok!(manager.start(&mut ex).await);
    assert!(store.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn sessions_survive_a_manager_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sessions.db");

    let first = sqlite_manager(&db).await;
    let mut ex = HttpExchange::from_request(&get(None));
    let store = assert_ok!(first.start(&mut ex).await);
    store.set("theme", "dark");
    assert_ok!(store.save().await);
    first.shutdown().await;
    drop(first);

    let mut response = Response::new(());
    ex.apply_to(&mut response);
    let cookie = cookie_from(&response, "_sessid_");

    let second = sqlite_manager(&db).await;
    let mut ex = HttpExchange::from_request(&get(Some(&cookie)));
    let store = assert_ok!(second.start(&mut ex).await);
    assert_eq!(store.get("theme"), Some(json!("dark")));
}

#[tokio::test]
async fn tampered_signed_token_starts_a_new_session() {
    let config = SessionConfig::default().with_token_codec(Arc::new(SignedCodec::random()));
    let registry = Arc::new(assert_ok!(ProviderRegistry::with_builtin_providers()));
    let mut manager = assert_ok!(SessionManager::new(config, registry));
    assert_ok!(
        manager
            .set_provider("memory", &MemoryProviderConfig::default())
            .await
    );

    let mut ex = HttpExchange::from_request(&get(None));
    let original = assert_ok!(manager.start(&mut ex).await);
    let mut response = Response::new(());
    ex.apply_to(&mut response);
    let cookie = cookie_from(&response, "_sessid_");

    let forged = cookie
        .to_str()
        .unwrap()
        .replacen(&original.session_id()[..4], "ffff", 1);
    let forged = HeaderValue::from_str(&forged).unwrap();

    let mut ex = HttpExchange::from_request(&get(Some(&forged)));
    let fresh = assert_ok!(manager.start(&mut ex).await);
    assert_ne!(fresh.session_id(), original.session_id());

    let mut ex = HttpExchange::from_request(&get(Some(&cookie)));
    let resumed = assert_ok!(manager.start(&mut ex).await);
    assert_eq!(resumed.session_id(), original.session_id());
}

#[tokio::test]
async fn unknown_backend_is_a_configuration_error() {
    let registry = Arc::new(ProviderRegistry::new());
    let mut manager = assert_ok!(SessionManager::new(SessionConfig::default(), registry));

    let err = assert_err!(
        manager
            .set_provider("redis", &MemoryProviderConfig::default())
            .await
    );
    assert!(err.is_configuration());

    let mut ex = HttpExchange::from_request(&get(None));
    let err = assert_err!(manager.start(&mut ex).await);
    assert!(matches!(err, SessionError::NoProvider));
}
