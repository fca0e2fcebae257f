use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::types::{GenerateOptions, GenerateRequest, GenerateResponse};
use super::{Backend, BackendError, BackendKind, GenerationParams};

pub const LOCAL_DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const LOCAL_DEFAULT_MODEL: &str = "llama3";

/// Adapter for an inference server on a locally reachable address.
pub struct LocalBackend {
    client: Client,
    endpoint: String,
    model: String,
}

impl LocalBackend {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: super::http_client(),
            endpoint,
            model,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

fn classify_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            retry_after: None,
            message,
        },
        StatusCode::REQUEST_TIMEOUT => BackendError::TransientNetwork(format!("status 408: {message}")),
        s if s.is_server_error() => {
            BackendError::TransientNetwork(format!("status {}: {message}", s.as_u16()))
        }
        // No authentication exists here, so 401/403 land with the other 4xx.
        s => BackendError::InvalidResponse(format!("unexpected status {}: {message}", s.as_u16())),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn submit(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let req = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: params.system_prompt.clone(),
            stream: false,
            options: GenerateOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::TransientNetwork(format!(
                        "local inference server not reachable at {}: {e}",
                        self.endpoint
                    ))
                } else {
                    BackendError::from(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(super::error_from_response(response, classify_status).await);
        }

        let body = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("malformed body: {e}")))?;
        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        Ok(text)
    }
}
