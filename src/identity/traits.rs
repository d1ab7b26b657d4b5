//! Strategy traits for minting session ids and shaping them on the wire.

use anyhow::Result;

/// Produces new session ids.
///
/// Implementations are called concurrently from every in-flight request and
/// must never return an empty string under normal operation.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Transforms a session id into the value carried by the cookie, query
/// parameter or header, and back.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, session_id: &str) -> Result<String>;

    fn decode(&self, token: &str) -> Result<String>;

    fn name(&self) -> &str;
}
