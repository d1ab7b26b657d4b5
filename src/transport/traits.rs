//! The HTTP surface the session engine reads tokens from and writes them to.

use cookie::Cookie;

use crate::identity::RequestId;

/// One request/response pair as seen by the session engine.
///
/// Implemented by the HTTP layer. The engine never parses raw headers
/// itself; it asks the exchange for named cookies, headers and query
/// parameters and hands back fully built cookies.
pub trait Exchange: Send {
    /// Correlation id assigned when the request entered the server.
    fn request_id(&self) -> &RequestId;

    /// Whether the connection is encrypted. `Secure` cookies are only issued
    /// over TLS.
    fn is_tls(&self) -> bool;

    fn request_cookie(&self, name: &str) -> Option<String>;

    /// Drop a cookie from the request view so later handlers no longer see it.
    fn remove_request_cookie(&mut self, name: &str);

    /// Queue a `Set-Cookie` on the response, replacing any pending cookie
    /// with the same name.
    fn set_response_cookie(&mut self, cookie: Cookie<'static>);

    fn query_param(&self, name: &str) -> Option<String>;

    fn request_header(&self, name: &str) -> Option<String>;

    fn set_request_header(&mut self, name: &str, value: &str);

    fn set_response_header(&mut self, name: &str, value: &str);

    fn remove_request_header(&mut self, name: &str);

    fn remove_response_header(&mut self, name: &str);
}
