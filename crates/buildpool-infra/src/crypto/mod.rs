//! Cryptographic operations for buildpool.
//!
//! - `hash`: SHA-256 payload checksums for stored builders

pub mod hash;
