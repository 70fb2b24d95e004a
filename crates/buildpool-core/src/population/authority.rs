//! Authoritative pool port.
//!
//! The authority is the single source of truth for which builders exist and
//! which are culled. Implementations handle the transport (HTTP in
//! buildpool-infra); retry policy lives in the reconciler.

use std::future::Future;

use buildpool_types::error::AuthorityError;
use buildpool_types::sync::{PublishRequest, PublishResponse, SyncRequest, SyncResponse};

/// Transport to the authoritative pool.
pub trait PoolAuthority: Send + Sync {
    /// One two-way sync exchange.
    fn sync(
        &self,
        request: &SyncRequest,
    ) -> impl Future<Output = Result<SyncResponse, AuthorityError>> + Send;

    /// Publish a newly minted builder and receive its id.
    ///
    /// A name collision is reported as [`AuthorityError::Conflict`].
    fn publish(
        &self,
        request: &PublishRequest,
    ) -> impl Future<Output = Result<PublishResponse, AuthorityError>> + Send;
}
