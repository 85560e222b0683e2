//! Error types and result alias.
//!
//! Reload failures never reach authorization callers: only the loader sees
//! [`AuthzError::RemoteFetch`]. Lookups on a cache that has never been
//! populated report the `*NotFound` variants.

use thiserror::Error;

/// Result type alias used across the crate.
pub type AuthzResult<T> = Result<T, AuthzError>;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("secret not found: {id}")]
    SecretNotFound { id: String },

    #[error("policy not found for subject: {subject}")]
    PolicyNotFound { subject: String },

    /// Malformed pub/sub payload or upstream response body
    #[error("decode error: {0}")]
    Decode(String),

    #[error("notification signature is invalid")]
    InvalidSignature,

    /// Upstream list call exhausted its retry budget
    #[error("{operation} failed after {attempts} attempts: {message}")]
    RemoteFetch {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("pub/sub error: {0}")]
    PubSub(String),

    #[error("snapshot file error: {0}")]
    Snapshot(String),

    #[error("audit error: {0}")]
    Audit(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Loader was cancelled before the fetched data could be committed
    #[error("loader is shutting down")]
    Shutdown,
}

impl AuthzError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthzError::Transport(_) | AuthzError::PubSub(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AuthzError::SecretNotFound { .. } | AuthzError::PolicyNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AuthzError::Transport("connection refused".into()).is_transient());
        assert!(!AuthzError::Decode("bad json".into()).is_transient());
        assert!(!AuthzError::Shutdown.is_transient());
    }

    #[test]
    fn test_remote_fetch_message() {
        let err = AuthzError::RemoteFetch {
            operation: "list secrets".into(),
            attempts: 3,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "list secrets failed after 3 attempts: connection refused"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(AuthzError::SecretNotFound { id: "abc".into() }.is_not_found());
        assert!(AuthzError::PolicyNotFound {
            subject: "alice".into()
        }
        .is_not_found());
        assert!(!AuthzError::InvalidSignature.is_not_found());
    }
}
