//! Deterministic hashing for idempotence and echo suppression.
//!
//! Both hashes are SHA-256 over canonical JSON: object keys sorted, relation
//! and multi-select arrays pre-sorted by the caller.

use serde_json::Value;
use sha2::{Digest, Sha256};

use tm_core::PagePayload;

use crate::resolver::ResolvedRelations;

/// Serialize a JSON value with all object keys sorted, recursively.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The forward idempotence hash: mapped payload plus resolved relation ids.
pub fn payload_hash(payload: &PagePayload, relations: &ResolvedRelations) -> String {
    let value = serde_json::json!({
        "payload": payload,
        "relations": relations,
    });
    sha256_hex(canonical_json(&value).as_bytes())
}

/// Hash of a reverse intention (project rename / archive toggle), used for
/// echo suppression.
pub fn reverse_intention_hash(name: &str, archived: bool) -> String {
    let value = serde_json::json!({
        "name": name,
        "archived": archived,
    });
    sha256_hex(canonical_json(&value).as_bytes())
}
