//! Token transport: where the session id travels between client and server.

pub mod cookie;
pub mod http;
pub mod traits;

pub use self::cookie::{CookieOptions, CookieTransport};
pub use self::http::{HttpExchange, REQUEST_ID_HEADER};
pub use traits::Exchange;
