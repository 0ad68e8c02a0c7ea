//! Request facade: one call from prompt and sources to generated text.

use crate::context::token;
use crate::context::{AssemblyError, ContextAssembler, ContextSource, Strategy, TraceEntry, UnknownStrategy};
use docforge_config::ContextConfig;
use docforge_core::Message;
use docforge_providers::{BackendOrchestrator, DispatchRequest, OrchestratorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSTEM_PREAMBLE: &str = "You generate structured business and technical documents. \
Ground the document in the reference material below and keep its structure.";

/// A document-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Instruction fragments, joined into the user message
    pub prompt_parts: Vec<String>,
    pub sources: Vec<ContextSource>,
    /// Budget for the assembled context only
    pub token_budget: usize,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    pub content: String,
    pub provider_used: String,
    pub model: String,
    /// Reported by the backend, or estimated when it reports nothing
    pub tokens_used: u32,
    pub tokens_estimated: bool,
    pub context_tokens: usize,
    pub attempts: u32,
    #[serde(with = "millis")]
    pub latency: Duration,
    pub trace: Vec<TraceEntry>,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerateError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Ties context assembly to backend dispatch.
#[derive(Debug, Clone)]
pub struct RequestFacade {
    assembler: ContextAssembler,
    orchestrator: Arc<BackendOrchestrator>,
}

impl RequestFacade {
    pub fn new(assembler: ContextAssembler, orchestrator: Arc<BackendOrchestrator>) -> Self {
        Self {
            assembler,
            orchestrator,
        }
    }

    /// Build from the `[context]` config section.
    pub fn from_config(
        config: &ContextConfig,
        orchestrator: Arc<BackendOrchestrator>,
    ) -> Result<Self, UnknownStrategy> {
        let strategy: Strategy = config.strategy.parse()?;
        Ok(Self::new(ContextAssembler::new(strategy), orchestrator))
    }

    pub fn orchestrator(&self) -> &Arc<BackendOrchestrator> {
        &self.orchestrator
    }

    /// Assemble context for the preferred backend and dispatch.
    pub async fn generate(
        &self,
        request: GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult, GenerateError> {
        let prompt = request
            .prompt_parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if prompt.is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled.into());
        }

        // Context is sized for the preferred backend; a fallback gets the
        // same context.
        let preferred = self
            .orchestrator
            .registry()
            .list_usable_backends()
            .into_iter()
            .next()
            .ok_or(OrchestratorError::NoUsableBackends)?;

        let built = self.assembler.build(
            &preferred.config.name,
            &preferred.config.model,
            &request.sources,
            request.token_budget,
        )?;

        let mut messages = Vec::with_capacity(2);
        if built.context.is_empty() {
            messages.push(Message::system(SYSTEM_PREAMBLE));
        } else {
            messages.push(Message::system(format!("{SYSTEM_PREAMBLE}\n\n{}", built.context)));
        }
        messages.push(Message::user(prompt));

        info!(
            target_backend = %preferred.config.name,
            context_tokens = built.total_tokens,
            sources_included = built.included().count(),
            sources_total = built.trace.len(),
            "Dispatching generation request"
        );

        let dispatch = DispatchRequest {
            messages,
            max_tokens: request.max_output_tokens,
        };
        let dispatched = self.orchestrator.dispatch(&dispatch, cancel).await?;

        if dispatched.backend != built.target_backend {
            warn!(
                preferred = %built.target_backend,
                used = %dispatched.backend,
                "Served by fallback backend"
            );
        }

        let (tokens_used, tokens_estimated) = match dispatched.reply.usage {
            Some(usage) => (usage.total_tokens, false),
            None => {
                let estimate = token::estimate_messages_tokens(&dispatch.messages)
                    + token::estimate_tokens(&dispatched.reply.text);
                (u32::try_from(estimate).unwrap_or(u32::MAX), true)
            }
        };

        Ok(GenerateResult {
            content: dispatched.reply.text,
            provider_used: dispatched.backend,
            model: dispatched.reply.model,
            tokens_used,
            tokens_estimated,
            context_tokens: built.total_tokens,
            attempts: dispatched.attempts,
            latency: dispatched.latency,
            trace: built.trace,
        })
    }
}
