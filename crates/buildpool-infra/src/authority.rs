//! HTTP client for the authoritative pool.
//!
//! Implements [`PoolAuthority`] over two JSON endpoints:
//!
//! - `POST {base}/sync`     -- summaries in, `{add, cull}` out
//! - `POST {base}/builders` -- publish a new builder, `{id}` out
//!
//! The bearer token is held as a [`SecretString`] and only exposed when the
//! `Authorization` header is built.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;

use buildpool_core::population::authority::PoolAuthority;
use buildpool_types::error::AuthorityError;
use buildpool_types::sync::{PublishRequest, PublishResponse, SyncRequest, SyncResponse};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed authority client.
pub struct HttpPoolAuthority {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

// HttpPoolAuthority intentionally does NOT derive Debug so the token can
// never end up in logs.

impl HttpPoolAuthority {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("buildpool/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AuthorityError> {
        let url = self.url(path);
        tracing::debug!(url = %url, "Authority request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthorityError::Unreachable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::warn!(status = %status, url = %url, body = %body, "Authority error response");

            return Err(match status.as_u16() {
                401 | 403 => AuthorityError::Unauthorized,
                409 => AuthorityError::Conflict(body),
                code => AuthorityError::Server {
                    status: code,
                    message: body,
                },
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AuthorityError::Decode(format!("{url}: {e}")))
    }
}

impl PoolAuthority for HttpPoolAuthority {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, AuthorityError> {
        self.post("sync", request).await
    }

    async fn publish(&self, request: &PublishRequest) -> Result<PublishResponse, AuthorityError> {
        self.post("builders", request).await
    }
}
