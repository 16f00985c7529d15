//! Error types for the content-addressable caching subsystem.

use thiserror::Error;

/// Errors raised internally by the cache decoders and disk persistence layer.
///
/// These never escape the public [`crate::Decoder`] interface as `Err` for
/// ordinary cache conditions (a miss, a disk hiccup): callers log and
/// degrade instead. The type exists so that call sites can distinguish the
/// few conditions that are genuinely exceptional (a corrupted in-memory
/// invariant) from the everyday "not cached yet" case.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Decoded pixel content did not hash to the id the server (or a prior
    /// disk entry) claimed it would. The entry must not be cached.
    #[error("cache content hash mismatch for id {id:02x?}: expected {expected}, computed {computed}")]
    HashMismatch {
        id: Vec<u8>,
        expected: String,
        computed: String,
    },

    /// A cache protocol message violated its wire framing contract.
    #[error("cache protocol framing error: {0}")]
    Framing(String),

    /// A cache data structure invariant was violated (should never happen;
    /// indicates a bug rather than a transient condition).
    #[error("cache invariant violated: {0}")]
    Corrupt(String),

    /// Disk I/O for the persistent cache's index or shard files failed.
    #[error("persistent cache disk I/O error: {0}")]
    Disk(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_mismatch_message_contains_both_hashes() {
        let err = CacheError::HashMismatch {
            id: vec![1, 2, 3],
            expected: "abc".into(),
            computed: "def".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("def"));
    }
}
