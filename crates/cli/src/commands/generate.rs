//! `docforge generate`: assemble context from files and generate a document.

use clap::Args;
use docforge_config::EnvCredentials;
use docforge_engine::{ContextSource, GenerateRequest, RequestFacade, SourceKind};
use docforge_providers::build_orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Freshness halves every 30 days of file age.
const FRESHNESS_HALF_LIFE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Instructions for the document (multiple parts are joined)
    #[arg(required = true)]
    pub prompt: Vec<String>,

    /// Project metadata files
    #[arg(long = "metadata", value_name = "FILE")]
    pub metadata: Vec<PathBuf>,

    /// Template files
    #[arg(long = "template", value_name = "FILE")]
    pub templates: Vec<PathBuf>,

    /// Previously generated documents this one depends on
    #[arg(long = "dependency", value_name = "FILE")]
    pub dependencies: Vec<PathBuf>,

    /// Context token budget (overrides config)
    #[arg(long)]
    pub budget: Option<usize>,

    /// Max output tokens (overrides config)
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Assembly strategy: quality_first, balanced, freshness_first
    #[arg(long)]
    pub strategy: Option<String>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config: Option<&Path>, args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(strategy) = &args.strategy {
        config.context.strategy = strategy.clone();
    }

    let orchestrator = Arc::new(build_orchestrator(&config, Arc::new(EnvCredentials))?);
    let facade = RequestFacade::from_config(&config.context, orchestrator)?;

    let request = GenerateRequest {
        sources: load_sources(&args)?,
        prompt_parts: args.prompt,
        token_budget: args.budget.unwrap_or(config.context.token_budget),
        max_output_tokens: args.max_tokens.unwrap_or(config.context.max_output_tokens),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let result = facade.generate(request, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.content);
    eprintln!();
    eprintln!(
        "── {} ({}) · {} tokens{} · {} attempt(s) · {}ms",
        result.provider_used,
        result.model,
        result.tokens_used,
        if result.tokens_estimated { " (estimated)" } else { "" },
        result.attempts,
        result.latency.as_millis()
    );
    eprintln!("── Context: {} tokens", result.context_tokens);
    for entry in &result.trace {
        let mark = if entry.included { "✅" } else { "⏭️ " };
        eprintln!("   {mark} {:<24} {:>6}  {}", entry.source_id, entry.tokens_used, entry.reason);
    }

    Ok(())
}

fn load_sources(args: &GenerateArgs) -> std::io::Result<Vec<ContextSource>> {
    let groups = [
        (SourceKind::ProjectMetadata, &args.metadata),
        (SourceKind::Template, &args.templates),
        (SourceKind::Dependency, &args.dependencies),
    ];
    let mut sources = Vec::new();
    for (kind, paths) in groups {
        for path in paths {
            sources.push(load_source(kind, path)?);
        }
    }
    Ok(sources)
}

/// Read one file as a context source. Quality defaults by kind; freshness
/// decays with the file's age.
fn load_source(kind: SourceKind, path: &Path) -> std::io::Result<ContextSource> {
    let text = std::fs::read_to_string(path)?;
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let age = std::fs::metadata(path)?
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .unwrap_or_default();
    Ok(ContextSource::new(id, kind, text).with_scores(default_quality(kind), freshness(age)))
}

fn default_quality(kind: SourceKind) -> f64 {
    match kind {
        SourceKind::ProjectMetadata => 0.9,
        SourceKind::Template => 0.7,
        SourceKind::Dependency => 0.5,
    }
}

fn freshness(age: Duration) -> f64 {
    0.5f64.powf(age.as_secs_f64() / FRESHNESS_HALF_LIFE.as_secs_f64())
}
