//! `docforge init`: write a default config file.

use docforge_config::AppConfig;
use std::path::Path;

pub async fn run(config: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(config);

    println!("DocForge — Setup");
    println!("================\n");

    if config_path.exists() && !force {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
        return Ok(());
    }

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        }
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Export the API keys named by each backend's credential_ref");
    println!("      (ANTHROPIC_API_KEY, OPENAI_API_KEY by default)");
    println!("   2. Run `docforge doctor` to check the setup");
    println!("   3. Run `docforge generate \"Write a project overview\" --metadata project.md`");

    Ok(())
}
