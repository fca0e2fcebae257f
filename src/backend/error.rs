//! Failures a backend adapter can report for a single call.

use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Credentials were rejected (HTTP 401/403). Hosted backends only.
    #[error("authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },

    /// The backend asked us to slow down (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Connection refused, timeouts, 5xx and other conditions worth retrying.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The backend answered, but not with something usable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Auth { .. } => ErrorKind::Auth,
            BackendError::RateLimited { .. } => ErrorKind::RateLimit,
            BackendError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            BackendError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else if err.is_timeout() {
            BackendError::TransientNetwork(format!("request timed out: {err}"))
        } else {
            BackendError::TransientNetwork(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
            message: "slow down".into(),
        };
        assert_eq!(err.to_string(), "rate limited: slow down");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn auth_display() {
        let err = BackendError::Auth {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert_eq!(
            err.to_string(),
            "authentication failed (status 401): Invalid API key"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn kinds() {
        assert_eq!(
            BackendError::TransientNetwork("x".into()).kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            BackendError::InvalidResponse("x".into()).kind(),
            ErrorKind::InvalidResponse
        );
        assert!(BackendError::TransientNetwork("x".into()).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BackendError>();
    }
}
