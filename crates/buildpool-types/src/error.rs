use thiserror::Error;

/// Errors surfaced by population operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("population is empty; sync with the authority to populate the replica")]
    EmptyPopulation,

    #[error("invalid artifact: {0}")]
    InvalidArtifact(#[from] ArtifactRejection),

    #[error("authority unavailable after {attempts} attempt(s): {reason}")]
    SyncUnavailable { attempts: u32, reason: String },

    #[error("publish conflict: name '{0}' already exists in the pool")]
    PublishConflict(String),

    #[error("authority error: {0}")]
    Authority(String),

    #[error("builder '{0}' not found")]
    NotFound(String),

    #[error("rewrite error: {0}")]
    Rewrite(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// The first validation rule an artifact violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactRejection {
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("file '{path}' is {size} bytes, exceeding the {limit} byte limit")]
    FileTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("unsafe file path '{0}'")]
    UnsafePath(String),

    #[error("content too short: {length} characters, minimum {minimum}")]
    ContentTooShort { length: usize, minimum: usize },

    /// Percentages, not fractions.
    #[error("insufficient mutation delta: {changed:.1}% of lines changed, minimum {minimum:.1}%")]
    InsufficientMutationDelta { changed: f64, minimum: f64 },
}

/// Errors returned by the authority transport.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority unreachable: {0}")]
    Unreachable(String),

    #[error("authority returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("authority rejected the credential")]
    Unauthorized,

    #[error("name conflict: {0}")]
    Conflict(String),

    #[error("invalid authority response: {0}")]
    Decode(String),
}

impl AuthorityError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthorityError::Unreachable(_) => true,
            AuthorityError::Server { status, .. } => *status >= 500 || *status == 429,
            AuthorityError::Unauthorized
            | AuthorityError::Conflict(_)
            | AuthorityError::Decode(_) => false,
        }
    }
}

/// Errors from population store operations (used by trait definitions in buildpool-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("corrupted builder '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("builder '{0}' not found")]
    NotFound(String),

    #[error("invalid builder key '{0}'")]
    InvalidKey(String),
}

impl From<StoreError> for PoolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => PoolError::NotFound(key),
            other => PoolError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_delta_display() {
        let err = PoolError::from(ArtifactRejection::InsufficientMutationDelta {
            changed: 3.0,
            minimum: 10.0,
        });
        let text = err.to_string();
        assert!(text.contains("insufficient mutation delta"));
        assert!(text.contains("3.0%"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(AuthorityError::Unreachable("timeout".into()).is_transient());
        assert!(
            AuthorityError::Server {
                status: 503,
                message: "busy".into()
            }
            .is_transient()
        );
        assert!(
            !AuthorityError::Server {
                status: 400,
                message: "bad".into()
            }
            .is_transient()
        );
        assert!(!AuthorityError::Conflict("taken".into()).is_transient());
        assert!(!AuthorityError::Unauthorized.is_transient());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: PoolError = StoreError::NotFound("abc".into()).into();
        assert!(matches!(err, PoolError::NotFound(ref k) if k == "abc"));

        let err: PoolError = StoreError::Io("disk full".into()).into();
        assert_eq!(err.to_string(), "storage error: I/O error: disk full");
    }
}
