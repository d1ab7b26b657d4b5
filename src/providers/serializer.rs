use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::traits::SessionSerializer;
use crate::sessions::SessionValues;

/// Plain JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl SessionSerializer for JsonSerializer {
    fn serialize(&self, values: &SessionValues) -> Result<String> {
        serde_json::to_string(values).context("Failed to serialize session contents")
    }

    fn deserialize(&self, raw: &str) -> Result<SessionValues> {
        serde_json::from_str(raw).context("Failed to deserialize session contents")
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// JSON wrapped in standard base64. Default for the built-in backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64JsonSerializer;

impl SessionSerializer for Base64JsonSerializer {
    fn serialize(&self, values: &SessionValues) -> Result<String> {
        let json = serde_json::to_vec(values).context("Failed to serialize session contents")?;
        Ok(STANDARD.encode(json))
    }

    fn deserialize(&self, raw: &str) -> Result<SessionValues> {
        let json = STANDARD
            .decode(raw.trim())
            .context("Session contents are not valid base64")?;
        serde_json::from_slice(&json).context("Failed to deserialize session contents")
    }

    fn name(&self) -> &str {
        "base64_json"
    }
}
