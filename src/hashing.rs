//! Cache key derivation.
//!
//! Two digests make up a cache key: the content hash of a file and the hash
//! of the active rule ids. Both are 32 hex characters (truncated SHA-256),
//! short enough for readable store keys while keeping collisions negligible.
//!
//! Content hashing normalizes trailing whitespace per line so that
//! whitespace-at-EOL edits do not invalidate cached results, while all other
//! whitespace (indentation included) stays significant. Rule-set hashing
//! sorts the ids first so composing the same packs in a different order
//! never causes a spurious cache miss.

use sha2::{Digest, Sha256};

/// The two digests identifying a (file, rule set) analysis unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub file_hash: String,
    pub rules_hash: String,
}

/// Hash file content, normalizing trailing whitespace on each line.
pub fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    for line in text.lines() {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    truncate_digest(hasher)
}

/// Hash a set of rule ids, invariant to input ordering.
pub fn hash_rule_set<S: AsRef<str>>(rule_ids: &[S]) -> String {
    let mut ids: Vec<&str> = rule_ids.iter().map(|s| s.as_ref()).collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    truncate_digest(hasher)
}

/// Build the cache key for a file's content under a set of rule ids.
pub fn cache_key<S: AsRef<str>>(content: &str, rule_ids: &[S]) -> CacheKey {
    CacheKey {
        file_hash: hash_content(content),
        rules_hash: hash_rule_set(rule_ids),
    }
}

fn truncate_digest(hasher: Sha256) -> String {
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}
