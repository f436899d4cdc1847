//! Stable content hashing for raw payloads, used to detect unchanged
//! observations so re-processing the same record does not append a
//! duplicate provenance entry (§3, §8).

use sha2::{Digest, Sha256};

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

pub fn hash_json(value: &serde_json::Value) -> String {
    // `to_string` on serde_json::Value is deterministic for a given value
    // (object key order is preserved as inserted), which is sufficient
    // here since we always hash the same source's payload shape.
    hash_str(&value.to_string())
}
