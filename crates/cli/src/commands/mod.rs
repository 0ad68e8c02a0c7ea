pub mod backends;
pub mod doctor;
pub mod generate;
pub mod health;
pub mod init;

use docforge_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// The config file in effect: `--config`, else the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load_from(&config_path(explicit))
}
