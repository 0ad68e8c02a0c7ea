//! `docforge backends`: list configured backends in dispatch order.

use docforge_config::{AppConfig, BackendEntry, BackendKind, EnvCredentials};
use std::path::Path;

pub async fn run(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🤖 Configured Backends");
    println!("======================\n");

    if config.backends.is_empty() {
        println!("  No backends configured — run `docforge init`");
        return Ok(());
    }

    for line in render(&config) {
        println!("{line}");
    }
    println!();
    println!("  Lower priority is tried first; ties keep config order.");

    Ok(())
}

fn render(config: &AppConfig) -> Vec<String> {
    let mut entries: Vec<&BackendEntry> = config.backends.iter().collect();
    entries.sort_by_key(|e| e.priority);

    let mut lines = vec![format!(
        "  {:<4} {:<14} {:<14} {:<28} {}",
        "PRIO", "NAME", "KIND", "MODEL", "CREDENTIALS"
    )];
    for e in entries {
        let kind = match e.kind {
            BackendKind::Anthropic => "anthropic",
            BackendKind::OpenaiCompat => "openai_compat",
        };
        lines.push(format!(
            "  {:<4} {:<14} {:<14} {:<28} {}",
            e.priority,
            e.name,
            kind,
            e.model,
            credential_status(e)
        ));
    }
    lines
}

fn credential_status(entry: &BackendEntry) -> String {
    if !entry.requires_credentials {
        return "not required".into();
    }
    let reference = entry.credential_ref.as_deref().unwrap_or("inline");
    if entry.resolve_credential(&EnvCredentials).is_some() {
        format!("✅ {reference}")
    } else {
        format!("❌ {reference} missing")
    }
}
