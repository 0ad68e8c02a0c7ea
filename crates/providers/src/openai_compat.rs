//! OpenAI-compatible backend.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any other endpoint that
//! exposes `/chat/completions`. Local endpoints may run without a key, in
//! which case no `Authorization` header is sent.

use crate::http;
use crate::registry::Credential;
use async_trait::async_trait;
use docforge_core::{Backend, BackendError, BackendReply, Message, Role, Usage};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible chat completions backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    model: String,
    credential: Credential,
    /// Refuse to send without a key
    requires_key: bool,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        client: reqwest::Client,
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            credential,
            requires_key: true,
            client,
        }
    }

    /// Allow keyless calls (Ollama, local vLLM).
    pub fn keyless(mut self) -> Self {
        self.requires_key = false;
        self
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message], max_tokens: u32) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(messages),
            "max_tokens": max_tokens,
            "stream": false,
        })
    }

    fn into_reply(&self, resp: ApiResponse) -> Result<BackendReply, BackendError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Transient("No choices in response".into()))?;

        let text = choice.message.content.unwrap_or_default();
        if text.is_empty() {
            return Err(BackendError::Transient("Response contained no text".into()));
        }

        Ok(BackendReply {
            text,
            usage: resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: resp.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<BackendReply, BackendError> {
        let api_key = self.credential.resolve();
        if api_key.is_none() && self.requires_key {
            return Err(BackendError::Configuration(format!(
                "No API key available for backend '{}'",
                self.name
            )));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, max_tokens);

        debug!(backend = %self.name, model = %self.model, "Sending completion request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(http::transport_error)?;

        let response = http::check_status(&self.name, response).await?;
        let api_resp: ApiResponse = response.json().await.map_err(http::decode_error)?;
        self.into_reply(api_resp)
    }
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("credential", &self.credential)
            .finish()
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
