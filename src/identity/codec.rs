//! Built-in token codecs.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::traits::TokenCodec;

type HmacSha256 = Hmac<Sha256>;

/// Passes the id through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl TokenCodec for PlainCodec {
    fn encode(&self, session_id: &str) -> Result<String> {
        Ok(session_id.to_string())
    }

    fn decode(&self, token: &str) -> Result<String> {
        Ok(token.to_string())
    }

    fn name(&self) -> &str {
        "plain"
    }
}

/// URL-safe base64 without padding. Obfuscation only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl TokenCodec for Base64Codec {
    fn encode(&self, session_id: &str) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(session_id.as_bytes()))
    }

    fn decode(&self, token: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .context("session token is not valid base64")?;
        String::from_utf8(bytes).context("session token is not valid UTF-8")
    }

    fn name(&self) -> &str {
        "base64"
    }
}

/// Appends an HMAC-SHA256 tag: `<id>.<hex tag>`.
///
/// Tokens whose tag does not verify are rejected, so a tampered or foreign
/// cookie resolves to a fresh session.
pub struct SignedCodec {
    key: Vec<u8>,
}

impl SignedCodec {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.len() < 32 {
            bail!("signing key must be at least 32 bytes, got {}", key.len());
        }
        Ok(Self { key })
    }

    /// Codec with a fresh random key. Tokens do not survive a restart.
    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }
}

impl std::fmt::Debug for SignedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCodec").finish_non_exhaustive()
    }
}

impl TokenCodec for SignedCodec {
    fn encode(&self, session_id: &str) -> Result<String> {
        let mut mac = self.mac();
        mac.update(session_id.as_bytes());
        let tag = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{session_id}.{tag}"))
    }

    fn decode(&self, token: &str) -> Result<String> {
        let Some((session_id, tag)) = token.rsplit_once('.') else {
            bail!("session token is missing its signature");
        };
        let tag = hex::decode(tag).context("session token signature is not hex")?;

        let mut mac = self.mac();
        mac.update(session_id.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| anyhow::anyhow!("session token signature mismatch"))?;
        Ok(session_id.to_string())
    }

    fn name(&self) -> &str {
        "signed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips_and_rejects_garbage() {
        let codec = Base64Codec;
        let token = codec.encode("2mC1x9").unwrap();
        assert_eq!(codec.decode(&token).unwrap(), "2mC1x9");
        assert!(codec.decode("***not base64***").is_err());
    }

    #[test]
    fn signed_codec_rejects_tampering() {
        let codec = SignedCodec::new(vec![7u8; 32]).unwrap();
        let token = codec.encode("session-a").unwrap();
        assert!(token.starts_with("session-a."));
        assert_eq!(codec.decode(&token).unwrap(), "session-a");

        let forged = token.replacen("session-a", "session-b", 1);
        assert!(codec.decode(&forged).is_err());
        assert!(codec.decode("session-a").is_err());
        assert!(codec.decode("session-a.zz").is_err());
    }

    #[test]
    fn signed_codec_keys_do_not_interoperate() {
        let a = SignedCodec::random();
        let b = SignedCodec::random();
        let token = a.encode("abc").unwrap();
        assert!(b.decode(&token).is_err());
    }

    #[test]
    fn signed_codec_requires_long_key() {
        assert!(SignedCodec::new(b"short".to_vec()).is_err());
    }
}
