//! Session id generation, token codecs and per-request identity.

pub mod codec;
pub mod generator;
pub mod request;
pub mod traits;

pub use codec::{Base64Codec, PlainCodec, SignedCodec};
pub use generator::{RandomTokenGenerator, UuidV7Generator};
pub use request::RequestId;
pub use traits::{IdGenerator, TokenCodec};

/// Shorten a session id for logs: first 4 chars + `***`.
pub fn redact(value: &str) -> String {
    match value.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &value[..idx]),
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_most_of_value() {
        assert_eq!(redact("abcdefgh"), "abcd***");
        assert_eq!(redact("abcd"), "***");
        assert_eq!(redact(""), "***");
        assert_eq!(redact("12345"), "1234***");
    }
}
