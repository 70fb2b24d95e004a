//! Business logic and port trait definitions for buildpool.
//!
//! This crate defines the "ports" (store, authority, rewriter, and hasher
//! traits) that the infrastructure layer implements. It depends only on
//! `buildpool-types` -- never on `buildpool-infra` or any IO crate.

pub mod population;
pub mod repository;
pub mod service;
