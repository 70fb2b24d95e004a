//! SHA-256 content hashing for builder payload checksums.
//!
//! Implements the `ContentHasher` trait from `buildpool-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use buildpool_core::service::hash::ContentHasher;

/// SHA-256 implementation of `ContentHasher`.
///
/// Produces lowercase hex digests. The population store compares them to
/// decide whether a builder's payload files need rewriting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256ContentHasher;

impl Sha256ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl ContentHasher for Sha256ContentHasher {
    fn compute_hash(&self, content: &str) -> String {
        format!("{:x}", Sha256::digest(content.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_digest() {
        assert_eq!(
            Sha256ContentHasher::new().compute_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_is_stable_lowercase_hex() {
        let hasher = Sha256ContentHasher::new();
        let a = hasher.compute_hash("---\nname: api-builder\n---\n");
        assert_eq!(a, hasher.compute_hash("---\nname: api-builder\n---\n"));
        assert_ne!(a, hasher.compute_hash("---\nname: api-builder-v1\n---\n"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
