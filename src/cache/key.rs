use sha2::{Digest, Sha256};

const METADATA_SUFFIX: &str = "#resource";
const BODY_SUFFIX: &str = "#body";

/// The pair of storage keys one logical cache key maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKeys {
    pub metadata: String,
    pub body: String,
}

impl StorageKeys {
    pub fn derive(logical_key: &str) -> Self {
        Self {
            metadata: digest_hex(logical_key, METADATA_SUFFIX),
            body: digest_hex(logical_key, BODY_SUFFIX),
        }
    }
}

fn digest_hex(logical_key: &str, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(logical_key.as_bytes());
    hasher.update(suffix.as_bytes());
    hex::encode(hasher.finalize())
}
