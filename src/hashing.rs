//! Hashing System - SHA-256 for Schema Definitions
//!
//! Gives every compiled schema a stable fingerprint so a report can name the
//! exact definition text that judged it.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compact JSON with object keys in sorted order.
///
/// Relies on `serde_json::Map` being a `BTreeMap`, which holds as long as the
/// `preserve_order` feature stays off.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::to_value(value)?)
}

/// Digest of a schema definition, independent of whitespace and key order.
/// Array order is significant: `required` and `enum` lists keep their meaning.
pub fn compute_schema_digest<T: Serialize>(definition: &T) -> Result<String, serde_json::Error> {
    canonical_json(definition).map(|json| sha256_hex(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"z": 1, "a": {"y": [2, 1], "b": null}}"#).unwrap();
        assert_eq!(canonical_json(&value).unwrap(), r#"{"a":{"b":null,"y":[2,1]},"z":1}"#);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_schema_digest_ignores_key_order() {
        let a = r#"{"type": "object", "required": ["k"], "properties": {"k": {"type": "string"}}}"#;
        let b = r#"{"properties": {"k": {"type": "string"}}, "required": ["k"], "type": "object"}"#;
        let a: serde_json::Value = serde_json::from_str(a).unwrap();
        let b: serde_json::Value = serde_json::from_str(b).unwrap();
        assert_eq!(compute_schema_digest(&a).unwrap(), compute_schema_digest(&b).unwrap());
    }

    #[test]
    fn test_schema_digest_tracks_enum_changes() {
        let a = json!({"properties": {"k": {"type": "string", "enum": ["linux"]}}});
        let b = json!({"properties": {"k": {"type": "string", "enum": ["linux", "windows"]}}});
        assert_ne!(compute_schema_digest(&a).unwrap(), compute_schema_digest(&b).unwrap());
    }
}
