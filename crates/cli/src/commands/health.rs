//! `docforge health`: print the backend health snapshot as JSON.

use docforge_config::EnvCredentials;
use docforge_core::Message;
use docforge_providers::{build_orchestrator, DispatchRequest};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Option<&Path>, probe: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config).map_err(|e| format!("Failed to load config: {e}"))?;
    let orchestrator = Arc::new(build_orchestrator(&config, Arc::new(EnvCredentials))?);

    if probe {
        let request = DispatchRequest {
            messages: vec![Message::user("Reply with the single word OK.")],
            max_tokens: 8,
        };
        match orchestrator.dispatch(&request, &CancellationToken::new()).await {
            Ok(d) => eprintln!("  ✅ Probe answered by {} in {}ms", d.backend, d.latency.as_millis()),
            Err(e) => eprintln!("  ❌ Probe failed: {e}"),
        }
    }

    let snapshot = orchestrator.health_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
