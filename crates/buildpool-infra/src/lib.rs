//! Infrastructure layer for buildpool.
//!
//! Implements the ports defined in `buildpool-core`: the filesystem
//! population store, the HTTP pool authority, and the external-process
//! content rewriter. Also loads configuration and credentials from the
//! data directory.

pub mod authority;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod filesystem;
pub mod rewriter;
