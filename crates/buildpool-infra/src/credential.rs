//! Bearer credential resolution for the authority.
//!
//! Priority:
//! 1. `BUILDPOOL_TOKEN` environment variable
//! 2. `token` in `{data_dir}/credentials.toml`
//!
//! No credential is not an error; requests go out unauthenticated and the
//! authority decides.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

pub const TOKEN_ENV: &str = "BUILDPOOL_TOKEN";

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    token: Option<String>,
}

/// Resolve the bearer token, if one is configured.
pub async fn resolve_token(data_dir: &Path) -> Option<SecretString> {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            return Some(SecretString::from(token.trim().to_owned()));
        }
        _ => {}
    }

    let path = data_dir.join("credentials.toml");
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read credentials");
            return None;
        }
    };

    match toml::from_str::<CredentialsFile>(&raw) {
        Ok(file) => file
            .token
            .filter(|t| !t.trim().is_empty())
            .map(|t| SecretString::from(t.trim().to_owned())),
        Err(_) => {
            // The parse error may quote the file, so only the path is logged.
            tracing::warn!(path = %path.display(), "Failed to parse credentials file");
            None
        }
    }
}
