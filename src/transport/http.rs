//! [`Exchange`] over `http` crate types.

use axum::extract::Query;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, Uri};
use cookie::Cookie;
use std::collections::HashMap;

use super::traits::Exchange;
use crate::identity::RequestId;

/// Header an upstream proxy may use to hand us a correlation id. Kept for
/// logs only; the request cache is always keyed on a freshly minted id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Owned request view plus the response headers and cookies the session
/// engine wants to emit.
///
/// Build one at request entry, run the session engine against it, then copy
/// the result onto the outgoing response with [`HttpExchange::apply_to`].
#[derive(Debug, Clone)]
pub struct HttpExchange {
    request_id: RequestId,
    upstream_request_id: Option<String>,
    tls: bool,
    uri: Uri,
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    response_cookies: Vec<Cookie<'static>>,
}

impl HttpExchange {
    pub fn new(uri: Uri, request_headers: HeaderMap) -> Self {
        let upstream_request_id = request_headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let tls = uri.scheme_str() == Some("https");

        Self {
            request_id: RequestId::new(),
            upstream_request_id,
            tls,
            uri,
            request_headers,
            response_headers: HeaderMap::new(),
            response_cookies: Vec::new(),
        }
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::new(request.uri().clone(), request.headers().clone())
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Correlation id supplied by an upstream proxy, if any.
    pub fn upstream_request_id(&self) -> Option<&str> {
        self.upstream_request_id.as_deref()
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_cookies(&self) -> &[Cookie<'static>] {
        &self.response_cookies
    }

    pub fn response_cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.response_cookies.iter().find(|c| c.name() == name)
    }

    /// Copy queued headers and `Set-Cookie` lines onto a response.
    pub fn apply_to<B>(&self, response: &mut Response<B>) {
        let headers = response.headers_mut();
        for (name, value) in &self.response_headers {
            headers.insert(name.clone(), value.clone());
        }
        for cookie in &self.response_cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => tracing::warn!(cookie = cookie.name(), "Dropping unencodable cookie: {e}"),
            }
        }
    }

    fn request_cookies(&self) -> impl Iterator<Item = Cookie<'_>> {
        self.request_headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
    }
}

fn header_name(name: &str) -> Option<HeaderName> {
    match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => Some(name),
        Err(e) => {
            tracing::debug!("Ignoring invalid header name {name:?}: {e}");
            None
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    let Some(name) = header_name(name) else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::debug!("Ignoring invalid value for header {name}: {e}"),
    }
}

impl Exchange for HttpExchange {
    fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    fn request_cookie(&self, name: &str) -> Option<String> {
        self.request_cookies()
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }

    fn remove_request_cookie(&mut self, name: &str) {
        let remaining: Vec<String> = self
            .request_cookies()
            .filter(|c| c.name() != name)
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect();

        self.request_headers.remove(COOKIE);
        if !remaining.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&remaining.join("; ")) {
                self.request_headers.insert(COOKIE, value);
            }
        }
    }

    fn set_response_cookie(&mut self, cookie: Cookie<'static>) {
        self.response_cookies.retain(|c| c.name() != cookie.name());
        self.response_cookies.push(cookie);
    }

    /// Pairs are decoded one at a time so a malformed neighbour does not
    /// hide a valid parameter. The first match wins.
    fn query_param(&self, name: &str) -> Option<String> {
        self.uri
            .query()?
            .split('&')
            .filter(|pair| !pair.is_empty())
            .find_map(|pair| {
                let uri = Uri::builder().path_and_query(format!("/?{pair}")).build().ok()?;
                let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&uri).ok()?;
                params.get(name).cloned()
            })
    }

    fn request_header(&self, name: &str) -> Option<String> {
        self.request_headers
            .get(header_name(name)?)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn set_request_header(&mut self, name: &str, value: &str) {
        set_header(&mut self.request_headers, name, value);
    }

    fn set_response_header(&mut self, name: &str, value: &str) {
        set_header(&mut self.response_headers, name, value);
    }

    fn remove_request_header(&mut self, name: &str) {
        if let Some(name) = header_name(name) {
            self.request_headers.remove(name);
        }
    }

    fn remove_response_header(&mut self, name: &str) {
        if let Some(name) = header_name(name) {
            self.response_headers.remove(name);
        }
    }
}
