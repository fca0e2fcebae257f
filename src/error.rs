use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;
use crate::job::CellAddress;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::InvalidRange(_) => Some(ErrorKind::InvalidRange),
            EngineError::Template(_) => Some(ErrorKind::Template),
            EngineError::Backend(e) => Some(e.kind()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template `{0}` is already registered")]
    Duplicate(String),

    #[error("unknown template `{0}`")]
    UnknownTemplate(String),

    #[error("template `{template}` references unknown placeholder `{{{placeholder}}}`")]
    UnknownPlaceholder { template: String, placeholder: String },

    #[error("template `{template}` is malformed at byte {offset}: {reason}")]
    Malformed {
        template: String,
        offset: usize,
        reason: &'static str,
    },

    #[error("variable `{variable}` is not available for cell {address}")]
    MissingVariable {
        variable: String,
        address: CellAddress,
    },
}

/// Flat failure taxonomy reported per cell in a run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Template,
    Auth,
    RateLimit,
    TransientNetwork,
    InvalidResponse,
    InvalidRange,
    Cancelled,
}

impl ErrorKind {
    /// Retryable kinds go through backoff; everything else fails the cell at once.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::TransientNetwork)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Template => "TemplateError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::RateLimit => "RateLimitError",
            ErrorKind::TransientNetwork => "TransientNetworkError",
            ErrorKind::InvalidResponse => "InvalidResponseError",
            ErrorKind::InvalidRange => "InvalidRangeError",
            ErrorKind::Cancelled => "CancelledError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::InvalidResponse.is_retryable());
        assert!(!ErrorKind::Template.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn error_kind_display_uses_taxonomy_names() {
        assert_eq!(ErrorKind::Auth.to_string(), "AuthError");
        assert_eq!(ErrorKind::RateLimit.to_string(), "RateLimitError");
        assert_eq!(ErrorKind::Cancelled.to_string(), "CancelledError");
    }

    #[test]
    fn template_error_display() {
        let err = TemplateError::UnknownPlaceholder {
            template: "greet".into(),
            placeholder: "nme".into(),
        };
        assert_eq!(
            err.to_string(),
            "template `greet` references unknown placeholder `{nme}`"
        );
    }

    #[test]
    fn engine_error_kind_mapping() {
        let err = EngineError::InvalidRange("empty".into());
        assert_eq!(err.kind(), Some(ErrorKind::InvalidRange));
        let err = EngineError::Template(TemplateError::UnknownTemplate("x".into()));
        assert_eq!(err.kind(), Some(ErrorKind::Template));
        let err = EngineError::Config("bad".into());
        assert_eq!(err.kind(), None);
    }
}
