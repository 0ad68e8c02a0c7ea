//! Wiring from configuration to a ready orchestrator.
//!
//! Picks the adapter for each configured backend and registers it with
//! its priority, timeout and credential reference.

use crate::anthropic::AnthropicBackend;
use crate::circuit_breaker::BreakerSettings;
use crate::http;
use crate::openai_compat::OpenAiCompatBackend;
use crate::orchestrator::BackendOrchestrator;
use crate::registry::{BackendConfig, BackendRegistry, Credential};
use crate::retry::RetryPolicy;
use docforge_config::{AppConfig, BackendEntry, BackendKind, CredentialResolver};
use docforge_core::{Backend, BackendError};
use std::sync::Arc;
use tracing::debug;

/// Build a registry holding one adapter per configured backend.
pub fn build_registry(
    config: &AppConfig,
    resolver: Arc<dyn CredentialResolver>,
) -> Result<BackendRegistry, BackendError> {
    let client = http::client()?;
    let mut registry = BackendRegistry::new();

    for entry in &config.backends {
        let backend_config = BackendConfig::from_entry(entry, resolver.clone());
        let backend = build_backend(&client, entry, backend_config.credential.clone());
        debug!(
            backend = %entry.name,
            kind = ?entry.kind,
            model = %entry.model,
            priority = entry.priority,
            "Registered backend"
        );
        registry.register(backend_config, backend);
    }

    Ok(registry)
}

fn build_backend(
    client: &reqwest::Client,
    entry: &BackendEntry,
    credential: Credential,
) -> Arc<dyn Backend> {
    match entry.kind {
        BackendKind::Anthropic => {
            let mut b = AnthropicBackend::new(client.clone(), &entry.name, &entry.model, credential);
            if let Some(url) = &entry.api_url {
                b = b.with_base_url(url);
            }
            Arc::new(b)
        }
        BackendKind::OpenaiCompat => {
            let base_url = entry
                .api_url
                .clone()
                .unwrap_or_else(|| default_base_url(&entry.name).to_string());
            let mut b = OpenAiCompatBackend::new(
                client.clone(),
                &entry.name,
                base_url,
                &entry.model,
                credential,
            );
            if !entry.requires_credentials {
                b = b.keyless();
            }
            Arc::new(b)
        }
    }
}

/// Build the orchestrator with breaker and retry settings from `config`.
pub fn build_orchestrator(
    config: &AppConfig,
    resolver: Arc<dyn CredentialResolver>,
) -> Result<BackendOrchestrator, BackendError> {
    let registry = build_registry(config, resolver)?;
    Ok(BackendOrchestrator::builder(Arc::new(registry))
        .breaker(BreakerSettings::from(&config.breaker))
        .retry(RetryPolicy::from(&config.retry))
        .build())
}

/// Default base URL for well-known OpenAI-compatible services.
pub fn default_base_url(backend_name: &str) -> &'static str {
    match backend_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => crate::openai_compat::DEFAULT_BASE_URL,
    }
}
