//! Shared domain types for buildpool.
//!
//! This crate contains the core domain types used across the workspace:
//! Builder, its lineage metadata, the wire types exchanged with the
//! authoritative pool, configuration, and the associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod builder;
pub mod config;
pub mod error;
pub mod sync;
