//! Backend orchestrator: ordered fallback across usable backends.
//!
//! Walks the registry's usable backends in priority order, running each
//! through the retry controller. The first success is returned and later
//! backends are never called. When every backend fails, the caller gets
//! one composite error naming each backend and why it failed.

use crate::circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};
use crate::registry::BackendRegistry;
use crate::retry::{Jitter, RetryController, RetryPolicy};
use docforge_core::{BackendError, BackendReply, Clock, ErrorClass, Message, SystemClock};
use docforge_telemetry::{LastError, MetricsStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A request to run against whichever backend answers first.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub messages: Vec<Message>,
    /// Max output tokens hint
    pub max_tokens: u32,
}

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub backend: String,
    pub reply: BackendReply,
    /// Tries made on the winning backend
    pub attempts: u32,
    pub latency: Duration,
}

/// Why one backend was given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendFailure {
    pub backend: String,
    pub attempts: u32,
    pub error: BackendError,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} attempt{}): {}",
            self.backend,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

fn summarize(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No usable backends: check credentials for the configured backends")]
    NoUsableBackends,

    #[error("All backends failed: {}", summarize(.failures))]
    Exhausted { failures: Vec<BackendFailure> },

    #[error("Request cancelled")]
    Cancelled,
}

/// Health view of one backend for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub state: CircuitState,
    pub usable: bool,
    pub consecutive_failures: u32,
    pub calls: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub recent_errors: Vec<ErrorClass>,
}

/// Read-only snapshot of every registered backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub per_backend: BTreeMap<String, BackendHealth>,
}

/// Owns the registry, breaker and metrics for the process lifetime.
pub struct BackendOrchestrator {
    registry: Arc<BackendRegistry>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsStore>,
    retry: RetryController,
}

/// Builder for [`BackendOrchestrator`].
pub struct OrchestratorBuilder {
    registry: Arc<BackendRegistry>,
    breaker: BreakerSettings,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    jitter: Option<Arc<dyn Jitter>>,
    metrics: Option<Arc<MetricsStore>>,
}

impl OrchestratorBuilder {
    pub fn breaker(mut self, settings: BreakerSettings) -> Self {
        self.breaker = settings;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Share an existing metrics store instead of creating one.
    pub fn metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> BackendOrchestrator {
        let breaker = Arc::new(CircuitBreaker::with_clock(self.breaker, self.clock.clone()));
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(MetricsStore::with_backends(self.registry.names())));
        let mut retry = RetryController::new(self.retry, breaker.clone(), metrics.clone())
            .with_clock(self.clock);
        if let Some(jitter) = self.jitter {
            retry = retry.with_jitter(jitter);
        }
        BackendOrchestrator {
            registry: self.registry,
            breaker,
            metrics,
            retry,
        }
    }
}

impl BackendOrchestrator {
    pub fn builder(registry: Arc<BackendRegistry>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            breaker: BreakerSettings::default(),
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            jitter: None,
            metrics: None,
        }
    }

    /// An orchestrator with default breaker and retry settings.
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    /// Send `request` to the first backend that succeeds.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, OrchestratorError> {
        let candidates = self.registry.list_usable_backends();
        if candidates.is_empty() {
            warn!("Dispatch: no usable backends");
            return Err(OrchestratorError::NoUsableBackends);
        }

        let mut failures = Vec::with_capacity(candidates.len());

        for (i, entry) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let name = entry.config.name.as_str();
            info!(
                backend = name,
                model = %entry.config.model,
                position = i + 1,
                total = candidates.len(),
                "Dispatch: trying backend"
            );

            let backend = entry.backend.clone();
            let outcome = self
                .retry
                .execute(&entry.config, cancel, || {
                    let backend = backend.clone();
                    let messages = &request.messages;
                    async move { backend.send(messages, request.max_tokens).await }
                })
                .await;

            match outcome.result {
                Ok(reply) => {
                    info!(
                        backend = name,
                        attempts = outcome.attempts,
                        latency_ms = outcome.latency.as_millis() as u64,
                        "Dispatch: backend succeeded"
                    );
                    return Ok(Dispatched {
                        backend: outcome.backend,
                        reply,
                        attempts: outcome.attempts,
                        latency: outcome.latency,
                    });
                }
                Err(BackendError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(error) => {
                    if error.class() == ErrorClass::Auth {
                        self.registry.mark_auth_rejected(name);
                    }
                    if self.retry.policy().hint_exceeds_limit(&error) {
                        warn!(
                            backend = name,
                            error = %error,
                            max_delay_ms = self.retry.policy().max_delay.as_millis() as u64,
                            "Dispatch: rate-limit hint longer than retry limit, falling back"
                        );
                    } else {
                        warn!(
                            backend = name,
                            error = %error,
                            "Dispatch: backend failed, trying next"
                        );
                    }
                    failures.push(BackendFailure {
                        backend: outcome.backend,
                        attempts: outcome.attempts,
                        error,
                    });
                }
            }
        }

        Err(OrchestratorError::Exhausted { failures })
    }

    /// Breaker state and metrics for every registered backend.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let per_backend = self
            .registry
            .names()
            .into_iter()
            .map(|name| {
                let circuit = self.breaker.snapshot(name);
                let m = self.metrics.snapshot(name);
                let health = BackendHealth {
                    state: circuit.state,
                    usable: self.registry.validate(name),
                    consecutive_failures: circuit.consecutive_failures,
                    calls: m.calls,
                    errors: m.errors,
                    avg_latency_ms: m.avg_latency_ms,
                    last_error: m.last_error,
                    recent_errors: m.recent_errors,
                };
                (name.to_string(), health)
            })
            .collect();
        HealthSnapshot { per_backend }
    }
}

impl std::fmt::Debug for BackendOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendOrchestrator")
            .field("backends", &self.registry.names())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
