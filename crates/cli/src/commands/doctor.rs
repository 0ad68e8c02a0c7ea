//! `docforge doctor`: diagnose configuration and credentials.

use docforge_config::{AppConfig, EnvCredentials};
use docforge_engine::Strategy;
use std::path::Path;

pub async fn run(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 DocForge Doctor — Diagnostics");
    println!("================================\n");

    let config_path = super::config_path(config);
    let (config, mut issues) = if config_path.exists() {
        match AppConfig::load_from(&config_path) {
            Ok(config) => {
                println!("  ✅ Config file valid: {}", config_path.display());
                (config, 0)
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                println!("\n  ⚠️  1 issue(s) found. Fix the config and re-run.");
                return Ok(());
            }
        }
    } else {
        println!("  ⚠️  No config file at {} — using defaults", config_path.display());
        println!("     Run `docforge init` to create one.");
        (AppConfig::default(), 1)
    };

    let report = check(&config);
    for line in &report.lines {
        println!("  {line}");
    }
    issues += report.issues;

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

struct Report {
    lines: Vec<String>,
    issues: usize,
}

fn check(config: &AppConfig) -> Report {
    let mut lines = Vec::new();
    let mut issues = 0;

    match config.context.strategy.parse::<Strategy>() {
        Ok(s) => lines.push(format!("✅ Assembly strategy: {s}")),
        Err(e) => {
            lines.push(format!("❌ {e}"));
            issues += 1;
        }
    }

    let mut usable = 0;
    for entry in &config.backends {
        if !entry.requires_credentials {
            lines.push(format!("✅ {}: no credentials required", entry.name));
            usable += 1;
        } else if entry.resolve_credential(&EnvCredentials).is_some() {
            lines.push(format!("✅ {}: credentials found", entry.name));
            usable += 1;
        } else {
            let hint = entry
                .credential_ref
                .as_deref()
                .map(|r| format!("export {r}"))
                .unwrap_or_else(|| "set api_key or credential_ref".into());
            lines.push(format!("⚠️  {}: no credentials — {hint}", entry.name));
            issues += 1;
        }
    }

    if usable == 0 {
        lines.push("❌ No usable backends; every generate request will fail".into());
        issues += 1;
    }

    Report { lines, issues }
}
