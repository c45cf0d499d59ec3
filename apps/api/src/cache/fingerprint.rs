use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cache key for an embedding: SHA-256 over (model id, model version, normalized text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(text: &str, model_id: &str, model_version: &str) -> Self {
        let normalized = normalize_text(text);
        let mut hasher = Sha256::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [model_id, model_version, normalized.as_str()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims and collapses runs of whitespace. Case is preserved; casing is the model's concern.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_variants_share_a_fingerprint() {
        let a = Fingerprint::compute("Python  and\nSQL ", "minilm", "v1");
        let b = Fingerprint::compute("Python and SQL", "minilm", "v1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_model_version_changes_fingerprint() {
        let a = Fingerprint::compute("Python", "minilm", "v1");
        let b = Fingerprint::compute("Python", "minilm", "v2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = Fingerprint::compute("c", "ab", "v1");
        let b = Fingerprint::compute("bc", "a", "v1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = Fingerprint::compute("x", "m", "v");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
