//! Crate-wide error type and classification.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ValetError>;

#[derive(Error, Debug)]
pub enum ValetError {
    /// Non-success response from a provider API.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Missing or rejected credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A backend operation the user must grant consent for first.
    /// Dispatch turns this into an auth-link result instead of a
    /// plain failure.
    #[error("Authorization required: {0}")]
    AuthorizationRequired(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// An in-band error event on a provider stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Malformed tool arguments or an unusable request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Delegation graph construction or lookup failure.
    #[error("Agent graph error: {0}")]
    Graph(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Coarse classification used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Server,
    Api,
    Stream,
    /// Graph, session, and argument errors: a bug or bad input, never
    /// worth retrying.
    Internal,
}

impl ValetError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { status: 401 | 403, .. }
            | Self::Authentication(_)
            | Self::AuthorizationRequired(_) => ErrorCategory::Authentication,
            Self::Api { status: 429, .. } | Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Api { status: 500..=599, .. } => ErrorCategory::Server,
            Self::Api { .. } => ErrorCategory::Api,
            Self::Network(_) => ErrorCategory::Network,
            Self::Stream(_) => ErrorCategory::Stream,
            Self::InvalidArgument(_)
            | Self::Graph(_)
            | Self::Session(_)
            | Self::InvalidState(_) => ErrorCategory::Internal,
        }
    }

    /// Transient failures worth retrying; everything else needs a code
    /// or credential fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_maps_to_category() {
        assert_eq!(
            ValetError::api(401, "no").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ValetError::api(429, "slow down").category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ValetError::api(503, "unavailable").category(),
            ErrorCategory::Server
        );
        assert_eq!(ValetError::api(404, "gone").category(), ErrorCategory::Api);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ValetError::api(500, "boom").is_retryable());
        assert!(ValetError::RateLimited {
            retry_after_ms: Some(100)
        }
        .is_retryable());
        assert!(!ValetError::Authentication("missing key".into()).is_retryable());
        assert!(!ValetError::Graph("cycle".into()).is_retryable());
        assert!(!ValetError::Session("write failed".into()).is_retryable());
    }
}
