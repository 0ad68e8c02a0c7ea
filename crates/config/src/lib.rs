//! Configuration loading, validation, and credential resolution for DocForge.
//!
//! Loads configuration from `~/.docforge/config.toml` (or the path in
//! `DOCFORGE_CONFIG`). Backend credentials are referenced by environment
//! variable name and resolved lazily, so a key exported after startup is
//! picked up on the next availability check.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// The root configuration structure.
///
/// Maps directly to `~/.docforge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Circuit breaker tuning
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Retry and backoff tuning
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context assembly defaults
    #[serde(default)]
    pub context: ContextConfig,

    /// Configured AI backends, in registration order
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendEntry>,
}

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Anthropic,
    OpenaiCompat,
}

/// One configured backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub name: String,

    pub kind: BackendKind,

    pub model: String,

    /// Lower is preferred
    #[serde(default)]
    pub priority: u32,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,

    /// Inline API key (takes precedence over `credential_ref`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Local endpoints (Ollama, vLLM) run without a key
    #[serde(default = "default_true")]
    pub requires_credentials: bool,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("priority", &self.priority)
            .field("credential_ref", &self.credential_ref)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("requires_credentials", &self.requires_credentials)
            .finish()
    }
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

fn default_backends() -> Vec<BackendEntry> {
    vec![
        BackendEntry {
            name: "anthropic".into(),
            kind: BackendKind::Anthropic,
            model: "claude-sonnet-4-20250514".into(),
            priority: 0,
            credential_ref: Some("ANTHROPIC_API_KEY".into()),
            api_key: None,
            api_url: None,
            timeout_secs: default_timeout_secs(),
            requires_credentials: true,
        },
        BackendEntry {
            name: "openai".into(),
            kind: BackendKind::OpenaiCompat,
            model: "gpt-4o".into(),
            priority: 1,
            credential_ref: Some("OPENAI_API_KEY".into()),
            api_key: None,
            api_url: None,
            timeout_secs: default_timeout_secs(),
            requires_credentials: true,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// First cooldown after opening
    #[serde(default = "default_base_cooldown_secs")]
    pub base_cooldown_secs: u64,

    /// Upper bound for the doubled cooldown after failed trials
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_base_cooldown_secs() -> u64 {
    30
}
fn default_max_cooldown_secs() -> u64 {
    600
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            base_cooldown_secs: default_base_cooldown_secs(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per backend, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the assembled context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Assembly strategy: "quality_first", "balanced", "freshness_first"
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Max output tokens hint sent to the backend
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_token_budget() -> usize {
    4096
}
fn default_strategy() -> String {
    "quality_first".into()
}
fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            strategy: default_strategy(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `DOCFORGE_CONFIG` or the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DOCFORGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_from(&path)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".docforge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.breaker.max_cooldown_secs < self.breaker.base_cooldown_secs {
            return Err(ConfigError::ValidationError(
                "breaker.max_cooldown_secs must be >= base_cooldown_secs".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("backend name must not be empty".into()));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
            if backend.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "backend '{}' has no model",
                    backend.name
                )));
            }
            if backend.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "backend '{}' timeout_secs must be > 0",
                    backend.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `docforge init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            backends: default_backends(),
        }
    }
}

// ── Credentials ───────────────────────────────────────────────────────────

/// Resolves a credential reference (an environment variable name) to a key.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<String>;
}

/// Reads credentials from the process environment at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, reference: &str) -> Option<String> {
        std::env::var(reference).ok().filter(|v| !v.trim().is_empty())
    }
}

/// An in-memory credential table. Entries can be added after startup.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    values: RwLock<HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reference: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(reference.into(), value.into());
    }

    pub fn remove(&self, reference: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(reference);
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, reference: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(reference).filter(|v| !v.trim().is_empty()).cloned()
    }
}

impl BackendEntry {
    /// Resolve the API key: inline value first, then `credential_ref`.
    pub fn resolve_credential(&self, resolver: &dyn CredentialResolver) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        self.credential_ref
            .as_deref()
            .and_then(|reference| resolver.resolve(reference))
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
