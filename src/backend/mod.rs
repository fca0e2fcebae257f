//! Uniform request/response contract over the AI backends.
//!
//! Every backend exposes one capability, [`Backend::submit`]: a whole prompt
//! in, a whole completion out. Variants differ only in wire format and in how
//! they map failures onto [`BackendError`]. New backends implement the trait.

pub mod error;
pub mod hosted;
pub mod local;
pub mod types;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::BackendError;
pub use hosted::HostedBackend;
pub use local::LocalBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote completion service reached over HTTPS with a credential.
    Hosted,
    /// Inference server on a locally reachable address, no authentication.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Hosted => write!(f, "hosted"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Opaque credential. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "CredentialRef(<none>)")
        } else {
            write!(f, "CredentialRef(<redacted>)")
        }
    }
}

/// Request budget: at most `requests` calls in any rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Identifies and bounds one backend. Fixed for the lifetime of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub endpoint: String,
    pub credential: CredentialRef,
    pub model: String,
    pub max_concurrency: usize,
    pub rate_limit: Option<RateLimit>,
}

impl BackendDescriptor {
    /// Key under which the governor tracks this backend's limits.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.kind, self.endpoint, self.model)
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a data manipulation assistant. Transform the cell content according to the user's instructions.";

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 150,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

/// The single capability every backend variant provides.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Sends one prompt and waits for the complete response text.
    async fn submit(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError>;
}

/// Builds the adapter described by `descriptor`.
pub fn connect(descriptor: &BackendDescriptor) -> Arc<dyn Backend> {
    match descriptor.kind {
        BackendKind::Hosted => Arc::new(HostedBackend::new(
            descriptor.endpoint.clone(),
            descriptor.credential.clone(),
            descriptor.model.clone(),
        )),
        BackendKind::Local => Arc::new(LocalBackend::new(
            descriptor.endpoint.clone(),
            descriptor.model.clone(),
        )),
    }
}

/// Prompt used by the connection check.
pub const CONNECTION_CHECK_PROMPT: &str = "Say 'OK' to confirm connection.";

/// Sends a tiny prompt to confirm the backend is reachable and accepts our credentials.
pub async fn check_connection(backend: &dyn Backend) -> Result<String, BackendError> {
    let params = GenerationParams {
        max_tokens: 10,
        ..GenerationParams::default()
    };
    let reply = backend.submit(CONNECTION_CHECK_PROMPT, &params).await?;
    if reply.trim().is_empty() {
        return Err(BackendError::InvalidResponse("empty response".into()));
    }
    Ok(reply)
}

/// Shared HTTP client settings for both variants.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Reads a `retry-after` header given in whole seconds.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Builds the error for a non-success response with a variant's status
/// mapping. A rate-limit error picks up the `retry-after` hint.
pub(crate) async fn error_from_response(
    response: reqwest::Response,
    classify: fn(reqwest::StatusCode, String) -> BackendError,
) -> BackendError {
    let status = response.status();
    let hint = retry_after(response.headers());
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    match classify(status, message) {
        BackendError::RateLimited { message, .. } => BackendError::RateLimited {
            retry_after: hint,
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let cred = CredentialRef::new("sk-secret");
        assert_eq!(format!("{cred:?}"), "CredentialRef(<redacted>)");
        assert_eq!(cred.expose(), "sk-secret");
        assert_eq!(format!("{:?}", CredentialRef::default()), "CredentialRef(<none>)");
    }

    #[test]
    fn descriptor_key_includes_kind_endpoint_model() {
        let d = BackendDescriptor {
            kind: BackendKind::Local,
            endpoint: "http://localhost:11434".into(),
            credential: CredentialRef::default(),
            model: "llama3".into(),
            max_concurrency: 2,
            rate_limit: None,
        };
        assert_eq!(d.key(), "local|http://localhost:11434|llama3");
    }

    #[test]
    fn backend_kind_serde_lowercase() {
        let kind: BackendKind = serde_json::from_str(r#""hosted""#).unwrap();
        assert_eq!(kind, BackendKind::Hosted);
        assert_eq!(BackendKind::Local.to_string(), "local");
    }

    #[test]
    fn default_generation_params() {
        let p = GenerationParams::default();
        assert_eq!(p.max_tokens, 150);
        assert!((p.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(p.system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    struct Echo(&'static str);

    #[async_trait]
    impl Backend for Echo {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn submit(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, BackendError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn check_connection_accepts_reply() {
        assert_eq!(check_connection(&Echo("OK")).await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn check_connection_rejects_empty_reply() {
        let err = check_connection(&Echo("  ")).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }
}
