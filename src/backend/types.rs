//! Wire types for the two backend variants.
//!
//! The hosted variant speaks a Messages-style completion API; the local
//! variant speaks the `/api/generate` dialect of local inference servers.

use serde::{Deserialize, Serialize};

/// Request body for the hosted completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// Response from the hosted completion endpoint. Only the fields we read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl MessagesResponse {
    /// Concatenated text blocks, trimmed.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<String>()
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Request body for a local `/api/generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_request_omits_empty_system() {
        let req = MessagesRequest {
            model: "m".into(),
            max_tokens: 10,
            temperature: 0.3,
            system: None,
            messages: vec![Message {
                role: "user".into(),
                content: "hi".into(),
            }],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("system"));
        assert!(json.contains(r#""max_tokens":10"#));
    }

    #[test]
    fn messages_response_joins_text_blocks() {
        let api_json = r#"{
            "id": "msg_123",
            "content": [
                {"type": "text", "text": "  Hello"},
                {"type": "tool_use"},
                {"type": "text", "text": " world  "}
            ],
            "model": "claude",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 15}
        }"#;
        let resp: MessagesResponse = serde_json::from_str(api_json).unwrap();
        assert_eq!(resp.text(), "Hello world");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn content_block_type_field_renames_correctly() {
        let block = ContentBlock {
            content_type: "text".into(),
            text: Some("hello".into()),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type""#));
        assert!(!json.contains("content_type"));
    }

    #[test]
    fn generate_request_shape() {
        let req = GenerateRequest {
            model: "llama3".into(),
            prompt: "p".into(),
            system: Some("s".into()),
            stream: false,
            options: GenerateOptions {
                temperature: 0.5,
                num_predict: 150,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 150);
        assert_eq!(json["system"], "s");
    }

    #[test]
    fn generate_response_ignores_extra_fields() {
        let json = r#"{"model":"llama3","response":"HELLO","done":true,"eval_count":3}"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.response, "HELLO");
        assert!(resp.done);
    }
}
