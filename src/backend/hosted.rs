use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::types::{Message, MessagesRequest, MessagesResponse};
use super::{Backend, BackendError, BackendKind, CredentialRef, GenerationParams};

pub const HOSTED_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const HOSTED_DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const API_VERSION: &str = "2023-06-01";

/// Remote completion service adapter.
pub struct HostedBackend {
    client: Client,
    endpoint: String,
    credential: CredentialRef,
    model: String,
}

impl HostedBackend {
    pub fn new(endpoint: String, credential: CredentialRef, model: String) -> Self {
        Self {
            client: super::http_client(),
            endpoint,
            credential,
            model,
        }
    }

    fn build_request(&self, prompt: &str, params: &GenerationParams) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system: params.system_prompt.clone(),
            messages: vec![Message {
                role: "user".into(),
                content: prompt.to_string(),
            }],
        }
    }
}

/// Maps a non-success status to the adapter error taxonomy.
fn classify_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth {
            status: status.as_u16(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            retry_after: None,
            message,
        },
        StatusCode::REQUEST_TIMEOUT => BackendError::TransientNetwork(format!("status 408: {message}")),
        s if s.is_server_error() => {
            BackendError::TransientNetwork(format!("status {}: {message}", s.as_u16()))
        }
        s => BackendError::InvalidResponse(format!("unexpected status {}: {message}", s.as_u16())),
    }
}

#[async_trait]
impl Backend for HostedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn submit(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let req = self.build_request(prompt, params);
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::error_from_response(response, classify_status).await);
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("malformed body: {e}")))?;
        let text = body.text();
        if text.is_empty() {
            return Err(BackendError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "x".into()),
            BackendError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "x".into()),
            BackendError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "x".into()),
            BackendError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "x".into()),
            BackendError::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, "x".into()),
            BackendError::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "x".into()),
            BackendError::InvalidResponse(_)
        ));
    }

    #[test]
    fn request_carries_params() {
        let backend = HostedBackend::new(
            HOSTED_API_URL.into(),
            CredentialRef::new("k"),
            "model-x".into(),
        );
        let params = GenerationParams {
            temperature: 0.7,
            max_tokens: 42,
            system_prompt: None,
        };
        let req = backend.build_request("hello", &params);
        assert_eq!(req.model, "model-x");
        assert_eq!(req.max_tokens, 42);
        assert!(req.system.is_none());
        assert_eq!(req.messages[0].content, "hello");
        assert_eq!(req.messages[0].role, "user");
    }
}
