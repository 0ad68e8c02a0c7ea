//! Circuit breaker: per-backend failure isolation.
//!
//! ```text
//! Closed   → Open:     consecutive failures reach the threshold
//! Open     → HalfOpen: cooldown deadline passed (checked on the next acquire)
//! HalfOpen → Closed:   the single trial call succeeded
//! HalfOpen → Open:     the trial failed; cooldown doubles up to the cap
//! ```
//!
//! Each backend has its own mutex. The outer map is only write-locked the
//! first time a backend name is seen.

use docforge_config::BreakerConfig;
use docforge_core::{BackendError, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            base_cooldown: Duration::from_secs(config.base_cooldown_secs),
            max_cooldown: Duration::from_secs(config.max_cooldown_secs.max(config.base_cooldown_secs)),
        }
    }
}

/// Circuit state for a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// What the breaker granted for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Normal call while Closed.
    Normal,
    /// The single trial call allowed while HalfOpen.
    Trial,
}

#[derive(Debug)]
struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    cooldown_deadline: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

impl Entry {
    fn new(base_cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            cooldown_deadline: None,
            cooldown: base_cooldown,
            trial_in_flight: false,
        }
    }
}

/// Read-only view of one backend's breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time left before an Open circuit admits a trial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining: Option<Duration>,
    /// Cooldown that applies the next time the circuit opens
    pub cooldown: Duration,
}

/// Thread-safe circuit breaker tracking every backend independently.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    fn entry(&self, backend: &str) -> Arc<Mutex<Entry>> {
        {
            let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = map.get(backend) {
                return entry.clone();
            }
        }
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        map.entry(backend.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::new(self.settings.base_cooldown))))
            .clone()
    }

    /// Ask to make a call. Fails fast with `CircuitOpen` when the circuit is
    /// open or a trial is already running.
    pub fn try_acquire(&self, backend: &str) -> Result<Permit, BackendError> {
        let entry = self.entry(backend);
        let mut e = entry.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();

        if e.state == CircuitState::Open
            && e.cooldown_deadline.is_some_and(|deadline| now >= deadline)
        {
            info!(backend, "Circuit half-open, allowing trial request");
            e.state = CircuitState::HalfOpen;
            e.trial_in_flight = false;
        }

        match e.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::HalfOpen if !e.trial_in_flight => {
                e.trial_in_flight = true;
                Ok(Permit::Trial)
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(BackendError::CircuitOpen {
                backend: backend.to_string(),
            }),
        }
    }

    /// Record a successful call made under `permit`.
    ///
    /// While HalfOpen only the trial decides the state. A `Normal` permit
    /// was granted before the circuit opened and its outcome is stale.
    pub fn record_success(&self, backend: &str, permit: Permit) {
        let entry = self.entry(backend);
        let mut e = entry.lock().unwrap_or_else(|e| e.into_inner());
        match (e.state, permit) {
            (CircuitState::Closed, _) => e.consecutive_failures = 0,
            (CircuitState::HalfOpen, Permit::Trial) => {
                info!(backend, "Circuit recovered (trial succeeded)");
                e.state = CircuitState::Closed;
                e.consecutive_failures = 0;
                e.cooldown = self.settings.base_cooldown;
                e.cooldown_deadline = None;
                e.trial_in_flight = false;
            }
            (state, permit) => {
                debug!(backend, %state, ?permit, "Ignoring stale success");
            }
        }
    }

    /// Record a failed call made under `permit`. May open the circuit.
    pub fn record_failure(&self, backend: &str, permit: Permit) {
        let entry = self.entry(backend);
        let mut e = entry.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        e.consecutive_failures = e.consecutive_failures.saturating_add(1);
        e.last_failure = Some(now);

        match (e.state, permit) {
            (CircuitState::Closed, _) => {
                if e.consecutive_failures >= self.settings.failure_threshold {
                    e.state = CircuitState::Open;
                    e.cooldown_deadline = Some(now + e.cooldown);
                    warn!(
                        backend,
                        failures = e.consecutive_failures,
                        cooldown_secs = e.cooldown.as_secs(),
                        "Circuit opened"
                    );
                }
            }
            (CircuitState::HalfOpen, Permit::Trial) => {
                e.cooldown = (e.cooldown * 2).min(self.settings.max_cooldown);
                e.state = CircuitState::Open;
                e.cooldown_deadline = Some(now + e.cooldown);
                e.trial_in_flight = false;
                warn!(
                    backend,
                    cooldown_secs = e.cooldown.as_secs(),
                    "Trial failed, circuit re-opened"
                );
            }
            (state, permit) => {
                debug!(backend, %state, ?permit, "Stale failure counted, state unchanged");
            }
        }
    }

    /// Give back a trial permit that was never used (e.g. the caller
    /// cancelled). Counts as neither success nor failure.
    pub fn release(&self, backend: &str, permit: Permit) {
        if permit != Permit::Trial {
            return;
        }
        let entry = self.entry(backend);
        let mut e = entry.lock().unwrap_or_else(|e| e.into_inner());
        if e.state == CircuitState::HalfOpen {
            e.trial_in_flight = false;
        }
    }

    /// Current state of one backend's circuit.
    pub fn snapshot(&self, backend: &str) -> CircuitSnapshot {
        let entry = self.entry(backend);
        let e = entry.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let cooldown_remaining = match (e.state, e.cooldown_deadline) {
            (CircuitState::Open, Some(deadline)) => Some(deadline.saturating_duration_since(now)),
            _ => None,
        };
        CircuitSnapshot {
            state: e.state,
            consecutive_failures: e.consecutive_failures,
            cooldown_remaining,
            cooldown: e.cooldown,
        }
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        self.snapshot(backend).state
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
