//! Anthropic native backend.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field

use crate::http;
use crate::registry::Credential;
use async_trait::async_trait;
use docforge_core::{Backend, BackendError, BackendReply, Message, Role, Usage};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    name: String,
    base_url: String,
    model: String,
    credential: Credential,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(
        client: reqwest::Client,
        name: impl Into<String>,
        model: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: model.into(),
            credential,
            client,
        }
    }

    /// Point at a proxy or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut rest: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => rest.push(msg),
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, rest)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message], max_tokens: u32) -> serde_json::Value {
        let (system, rest) = Self::extract_system(messages);
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&rest),
            "max_tokens": max_tokens,
        });
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        body
    }

    fn into_reply(resp: AnthropicResponse) -> Result<BackendReply, BackendError> {
        let text = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(BackendError::Transient("Response contained no text".into()));
        }

        Ok(BackendReply {
            text,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens.saturating_add(resp.usage.output_tokens),
            }),
            model: resp.model,
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<BackendReply, BackendError> {
        let api_key = self.credential.resolve().ok_or_else(|| {
            BackendError::Configuration(format!("No API key available for backend '{}'", self.name))
        })?;

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(messages, max_tokens);

        debug!(backend = %self.name, model = %self.model, "Sending Anthropic request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;

        let response = http::check_status(&self.name, response).await?;
        let api_resp: AnthropicResponse = response.json().await.map_err(http::decode_error)?;
        Self::into_reply(api_resp)
    }
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("credential", &self.credential)
            .finish()
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> AnthropicBackend {
        AnthropicBackend::new(
            reqwest::Client::new(),
            "anthropic",
            "claude-sonnet-4-20250514",
            Credential::inline("sk-ant-test"),
        )
    }

    #[test]
    fn constructor() {
        let b = backend();
        assert_eq!(b.name(), "anthropic");
        assert_eq!(b.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let b = backend().with_base_url("https://custom.proxy.com/");
        assert_eq!(b.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            Message::system("You write design docs"),
            Message::system("--- [Template] t1 ---\nOutline"),
            Message::user("Write the doc"),
            Message::assistant("Draft"),
        ];

        let (system, rest) = AnthropicBackend::extract_system(&messages);
        assert_eq!(
            system.as_deref(),
            Some("You write design docs\n\n--- [Template] t1 ---\nOutline")
        );
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, Role::User);
        assert_eq!(rest[1].role, Role::Assistant);
    }

    #[test]
    fn system_extraction_no_system() {
        let messages = vec![Message::user("Hello")];
        let (system, rest) = AnthropicBackend::extract_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn request_body_shape() {
        let body = backend().request_body(&[Message::system("ctx"), Message::user("go")], 512);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["system"], "ctx");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_01",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();

        let reply = AnthropicBackend::into_reply(resp).unwrap();
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.usage.unwrap().total_tokens, 15);
        assert_eq!(reply.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn usage_total_saturates() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "model": "m",
                "content": [{"type": "text", "text": "ok"}],
                "usage": {"input_tokens": 4294967295, "output_tokens": 7}
            }"#,
        )
        .unwrap();
        let usage = AnthropicBackend::into_reply(resp).unwrap().usage.unwrap();
        assert_eq!(usage.total_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn non_text_blocks_are_skipped() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "model": "m",
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Part one"},
                    {"type": "text", "text": "Part two"}
                ],
                "usage": {"input_tokens": 1, "output_tokens": 2}
            }"#,
        )
        .unwrap();
        let reply = AnthropicBackend::into_reply(resp).unwrap();
        assert_eq!(reply.text, "Part one\nPart two");
    }

    #[test]
    fn empty_content_is_transient() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{"model": "m", "content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#,
        )
        .unwrap();
        let err = AnthropicBackend::into_reply(resp).unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_key_is_configuration_error() {
        let b = AnthropicBackend::new(reqwest::Client::new(), "anthropic", "m", Credential::none());
        let err = b.send(&[Message::user("hi")], 16).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn debug_redacts_key() {
        let debug = format!("{:?}", backend());
        assert!(!debug.contains("sk-ant-test"));
    }
}
