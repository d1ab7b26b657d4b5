use rand::RngCore;
use uuid::Uuid;

use super::traits::IdGenerator;

/// Default generator: UUIDv7 in simple (unhyphenated) form.
///
/// The leading 48 bits are a millisecond timestamp, so ids sort by creation
/// time; the remaining bits are random.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn generate(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }

    fn name(&self) -> &str {
        "uuid_v7"
    }
}

/// 256-bit random token, hex encoded. Not time-ordered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl IdGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn name(&self) -> &str {
        "random"
    }
}
