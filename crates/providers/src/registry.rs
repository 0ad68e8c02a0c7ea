//! Backend registry: the configured set of backends and their usability.
//!
//! Usability is a pure data check: a backend needs a resolvable credential
//! (unless it is a local endpoint) and must not have had its credentials
//! rejected since the last reconfiguration. No network calls happen here.

use docforge_config::{BackendEntry, CredentialResolver};
use docforge_core::Backend;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// A lazily resolved API key.
///
/// Resolution happens on every call, so keys exported after startup are
/// seen by the next `validate` or `send`.
#[derive(Clone)]
pub struct Credential {
    inline: Option<String>,
    reference: Option<String>,
    resolver: Option<Arc<dyn CredentialResolver>>,
}

impl Credential {
    /// No credential at all.
    pub fn none() -> Self {
        Self {
            inline: None,
            reference: None,
            resolver: None,
        }
    }

    /// A fixed key.
    pub fn inline(key: impl Into<String>) -> Self {
        Self {
            inline: Some(key.into()),
            ..Self::none()
        }
    }

    /// A key looked up by reference through `resolver`.
    pub fn reference(reference: impl Into<String>, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            inline: None,
            reference: Some(reference.into()),
            resolver: Some(resolver),
        }
    }

    /// Build from a config entry (inline key wins over `credential_ref`).
    pub fn from_entry(entry: &BackendEntry, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            inline: entry.api_key.clone(),
            reference: entry.credential_ref.clone(),
            resolver: Some(resolver),
        }
    }

    /// The current key, if any.
    pub fn resolve(&self) -> Option<String> {
        if let Some(key) = self.inline.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        match (&self.reference, &self.resolver) {
            (Some(reference), Some(resolver)) => resolver.resolve(reference),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.resolve().is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("inline", &self.inline.as_ref().map(|_| "[REDACTED]"))
            .field("reference", &self.reference)
            .finish()
    }
}

/// Static description of one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub model: String,
    /// Lower is preferred
    pub priority: u32,
    /// Bound on a single attempt
    pub timeout: Duration,
    pub requires_credentials: bool,
    pub credential: Credential,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            priority,
            timeout: Duration::from_secs(120),
            requires_credentials: false,
            credential: Credential::none(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.requires_credentials = true;
        self.credential = credential;
        self
    }

    pub fn from_entry(entry: &BackendEntry, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            name: entry.name.clone(),
            model: entry.model.clone(),
            priority: entry.priority,
            timeout: Duration::from_secs(entry.timeout_secs),
            requires_credentials: entry.requires_credentials,
            credential: Credential::from_entry(entry, resolver),
        }
    }

    /// Whether the credentials this backend needs are available right now.
    pub fn has_credentials(&self) -> bool {
        !self.requires_credentials || self.credential.is_present()
    }
}

/// A backend config paired with the adapter that talks to it.
#[derive(Clone)]
pub struct RegisteredBackend {
    pub config: BackendConfig,
    pub backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Holds every configured backend in registration order.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    entries: Vec<RegisteredBackend>,
    auth_rejected: RwLock<HashSet<String>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. A later registration with the same name replaces
    /// the earlier one in place.
    pub fn register(&mut self, config: BackendConfig, backend: Arc<dyn Backend>) {
        let entry = RegisteredBackend { config, backend };
        match self
            .entries
            .iter_mut()
            .find(|e| e.config.name == entry.config.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Builder-style `register`.
    pub fn with(mut self, config: BackendConfig, backend: Arc<dyn Backend>) -> Self {
        self.register(config, backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredBackend> {
        self.entries.iter().find(|e| e.config.name == name)
    }

    /// All registered backend names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.config.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Usable backends sorted by ascending priority. Ties keep registration
    /// order (`sort_by_key` is stable).
    pub fn list_usable_backends(&self) -> Vec<RegisteredBackend> {
        let mut usable: Vec<RegisteredBackend> = self
            .entries
            .iter()
            .filter(|e| self.is_usable(&e.config))
            .cloned()
            .collect();
        usable.sort_by_key(|e| e.config.priority);
        usable
    }

    /// Re-check whether `name` is usable right now.
    pub fn validate(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| self.is_usable(&e.config))
    }

    fn is_usable(&self, config: &BackendConfig) -> bool {
        if !config.has_credentials() {
            return false;
        }
        let rejected = self.auth_rejected.read().unwrap_or_else(|e| e.into_inner());
        !rejected.contains(&config.name)
    }

    /// Exclude a backend whose credentials were rejected.
    pub fn mark_auth_rejected(&self, name: &str) {
        let mut rejected = self.auth_rejected.write().unwrap_or_else(|e| e.into_inner());
        if rejected.insert(name.to_string()) {
            warn!(backend = name, "Credentials rejected; backend excluded until reconfigured");
        }
    }

    /// Clear an auth rejection after the credentials were changed.
    pub fn reset_auth(&self, name: &str) {
        let mut rejected = self.auth_rejected.write().unwrap_or_else(|e| e.into_inner());
        if rejected.remove(name) {
            info!(backend = name, "Auth rejection cleared");
        }
    }

    pub fn is_auth_rejected(&self, name: &str) -> bool {
        let rejected = self.auth_rejected.read().unwrap_or_else(|e| e.into_inner());
        rejected.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docforge_config::StaticCredentials;
    use docforge_core::{BackendError, BackendReply, Message};

    struct Dummy(&'static str);

    #[async_trait]
    impl Backend for Dummy {
        fn name(&self) -> &str {
            self.0
        }

        async fn send(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
        ) -> std::result::Result<BackendReply, BackendError> {
            Err(BackendError::Transient("unused".into()))
        }
    }

    fn local(name: &'static str, priority: u32) -> (BackendConfig, Arc<dyn Backend>) {
        (BackendConfig::new(name, "m", priority), Arc::new(Dummy(name)))
    }

    fn names(list: &[RegisteredBackend]) -> Vec<&str> {
        list.iter().map(|e| e.config.name.as_str()).collect()
    }

    #[test]
    fn sorted_by_priority_ties_keep_registration_order() {
        let mut registry = BackendRegistry::new();
        for (name, prio) in [("c", 2), ("a", 1), ("b", 1), ("z", 0)] {
            let (cfg, be) = local(name, prio);
            registry.register(cfg, be);
        }
        assert_eq!(names(&registry.list_usable_backends()), vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn missing_credentials_filtered_out() {
        let creds = Arc::new(StaticCredentials::new());
        let (local_cfg, local_be) = local("local", 5);
        let keyed = BackendConfig::new("keyed", "m", 0)
            .with_credential(Credential::reference("KEYED_KEY", creds.clone()));

        let registry = BackendRegistry::new()
            .with(local_cfg, local_be)
            .with(keyed, Arc::new(Dummy("keyed")));

        assert_eq!(names(&registry.list_usable_backends()), vec!["local"]);
        assert!(!registry.validate("keyed"));

        // Late-bound credential becomes visible without re-registering
        creds.set("KEYED_KEY", "sk-late");
        assert!(registry.validate("keyed"));
        assert_eq!(names(&registry.list_usable_backends()), vec!["keyed", "local"]);
    }

    #[test]
    fn inline_credential_is_present() {
        let cfg = BackendConfig::new("x", "m", 0).with_credential(Credential::inline("sk"));
        assert!(cfg.has_credentials());
        let cfg = BackendConfig::new("y", "m", 0).with_credential(Credential::none());
        assert!(!cfg.has_credentials());
    }

    #[test]
    fn auth_rejection_excludes_until_reset() {
        let (cfg, be) = local("a", 0);
        let registry = BackendRegistry::new().with(cfg, be);
        registry.mark_auth_rejected("a");
        assert!(!registry.validate("a"));
        assert!(registry.list_usable_backends().is_empty());
        registry.reset_auth("a");
        assert!(registry.validate("a"));
    }

    #[test]
    fn unknown_backend_does_not_validate() {
        assert!(!BackendRegistry::new().validate("ghost"));
    }

    #[test]
    fn re_register_replaces_in_place() {
        let (a, be_a) = local("a", 0);
        let (b, be_b) = local("b", 0);
        let mut registry = BackendRegistry::new().with(a, be_a).with(b, be_b);
        let (a2, be_a2) = local("a", 9);
        registry.register(a2, be_a2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().config.priority, 9);
    }

    #[test]
    fn debug_redacts_inline_key() {
        let debug = format!("{:?}", Credential::inline("sk-secret"));
        assert!(!debug.contains("sk-secret"));
    }
}
