//! Backend trait: the abstraction over remote AI inference endpoints.
//!
//! A Backend knows how to send a role-tagged message list to a model and get
//! text back. Wire formats differ per vendor; the orchestrator only ever sees
//! this trait.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat completions.

use crate::error::BackendError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful reply from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    /// The generated text
    pub text: String,

    /// Token usage statistics, when the backend reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// The core Backend trait.
///
/// Every remote AI endpoint implements this once. The orchestrator calls
/// `send()` without knowing which vendor sits behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The configured backend name (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Send the messages and wait for the complete reply.
    async fn send(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> std::result::Result<BackendReply, BackendError>;
}
