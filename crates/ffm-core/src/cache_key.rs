//! Content-addressed keys for recognition results.
//!
//! A key is the SHA-256 of the raw input bytes followed by the canonical
//! JSON encoding of the processing parameters. Object keys are sorted at
//! every nesting level, so the order in which parameters were inserted
//! never changes the key. The byte section is length-prefixed so that no
//! `(bytes, params)` pair can be re-split into another.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Processing parameters that, together with the input bytes, identify a result.
pub type CacheParams = BTreeMap<String, Value>;

/// Hex-encoded SHA-256 cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Accept an existing hex key (64 lowercase hex chars).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical JSON for a parameter set.
pub fn canonical_params(params: &CacheParams) -> String {
    let object: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
    Value::Object(object).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Derive the cache key for `raw` processed under `params`.
pub fn build_key(raw: &[u8], params: &CacheParams) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update((raw.len() as u64).to_le_bytes());
    hasher.update(raw);
    hasher.update(canonical_params(params).as_bytes());
    CacheKey(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> CacheParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_same_input_same_key() {
        let p = params(&[("pre", json!("deskew+adaptive+denoise")), ("engine", json!("table"))]);
        assert_eq!(build_key(b"image", &p), build_key(b"image", &p));
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let a = params(&[("pre", json!("deskew")), ("engine", json!("table"))]);
        let b = params(&[("engine", json!("table")), ("pre", json!("deskew"))]);
        assert_eq!(build_key(b"image", &a), build_key(b"image", &b));

        let nested_a = params(&[("opts", json!({"lang": "ja", "angle": true}))]);
        let nested_b = params(&[("opts", json!({"angle": true, "lang": "ja"}))]);
        assert_eq!(build_key(b"x", &nested_a), build_key(b"x", &nested_b));
    }

    #[test]
    fn test_any_change_changes_key() {
        let base = params(&[("engine", json!("table")), ("lang", json!("japan"))]);
        let changed = params(&[("engine", json!("table")), ("lang", json!("en"))]);
        assert_ne!(build_key(b"image", &base), build_key(b"image", &changed));
        assert_ne!(build_key(b"image", &base), build_key(b"image2", &base));
    }

    #[test]
    fn test_byte_boundary_not_ambiguous() {
        // Shifting bytes between the raw input and the params must not collide.
        let empty = CacheParams::new();
        assert_ne!(build_key(b"{}", &empty), build_key(b"", &empty));
    }

    #[test]
    fn test_key_format() {
        let key = build_key(b"abc", &CacheParams::new());
        assert_eq!(key.as_str().len(), 64);
        assert_eq!(CacheKey::from_hex(key.as_str()), Some(key.clone()));
        assert_eq!(CacheKey::from_hex("xyz"), None);
    }
}
