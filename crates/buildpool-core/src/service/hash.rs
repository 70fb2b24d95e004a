//! ContentHasher trait for computing integrity hashes.
//!
//! Defined in buildpool-core so stores can checksum builder payloads without
//! coupling to a specific hashing algorithm. The `Sha256ContentHasher`
//! adapter lives in buildpool-infra.

/// Abstraction over content hashing.
///
/// The population store records a hash of each builder's payload (SKILL.md
/// plus supporting files) so an unchanged payload is not rewritten on every sync.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}
