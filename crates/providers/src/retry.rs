//! Retry controller: bounded retries with exponential backoff and jitter.
//!
//! One `execute` call is one logical attempt against one backend. The
//! breaker is consulted before every try; fatal errors (config/auth) are
//! returned at once; rate limits honour the server's retry hint; transient
//! errors back off exponentially with jitter. The breaker hears about the
//! logical attempt once: a success, a fatal error, or exhausted retries.
//! Cancellation is neither.

use crate::circuit_breaker::{CircuitBreaker, Permit};
use crate::registry::BackendConfig;
use docforge_config::RetryConfig;
use docforge_core::{BackendError, BackendReply, Clock, ErrorClass, SystemClock, Usage};
use docforge_telemetry::MetricsStore;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Tries per logical attempt, including the first (minimum 1).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed).
    ///
    /// With jitter the delay is drawn from `[d/2, d)` ("equal jitter"), so
    /// concurrent callers spread out but never retry immediately.
    pub fn backoff(&self, retry: u32, jitter: &dyn Jitter) -> Duration {
        let exp = self.multiplier.powi(retry.min(31) as i32);
        let base = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        if self.jitter {
            let sample = jitter.sample().clamp(0.0, 1.0);
            Duration::from_secs_f64(base * (0.5 + 0.5 * sample))
        } else {
            Duration::from_secs_f64(base)
        }
    }

    /// True when `err` is a rate limit whose server hint is longer than
    /// this policy is willing to wait.
    pub fn hint_exceeds_limit(&self, err: &BackendError) -> bool {
        matches!(
            err,
            BackendError::RateLimited { retry_after: Some(hint) } if *hint > self.max_delay
        )
    }
}

/// Source of jitter samples in `[0, 1)`.
pub trait Jitter: Send + Sync {
    fn sample(&self) -> f64;
}

/// Thread-local RNG jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Always returns the same sample. For tests and reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// The result of one logical attempt against one backend.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub backend: String,
    /// Network tries actually made
    pub attempts: u32,
    /// Wall time including backoff
    pub latency: Duration,
    pub result: Result<BackendReply, BackendError>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.result.as_ref().err().map(BackendError::class)
    }

    pub fn usage(&self) -> Option<Usage> {
        self.result.as_ref().ok().and_then(|r| r.usage)
    }
}

/// Wraps a backend call with retries, timeouts and breaker checks.
pub struct RetryController {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsStore>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn Jitter>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>, metrics: Arc<MetricsStore>) -> Self {
        Self {
            policy,
            breaker,
            metrics,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(RandomJitter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` against `backend` until it succeeds, fails fatally,
    /// runs out of attempts, hits an open circuit, or is cancelled.
    pub async fn execute<F, Fut>(
        &self,
        backend: &BackendConfig,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> CallOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<BackendReply, BackendError>>,
    {
        let name = backend.name.as_str();
        let started = self.clock.now();
        let mut attempts = 0u32;

        let finish = |attempts: u32, result: Result<BackendReply, BackendError>| CallOutcome {
            backend: name.to_string(),
            attempts,
            latency: self.clock.now().saturating_duration_since(started),
            result,
        };

        loop {
            if cancel.is_cancelled() {
                return finish(attempts, Err(BackendError::Cancelled));
            }

            let permit = match self.breaker.try_acquire(name) {
                Ok(permit) => permit,
                Err(err) => {
                    debug!(backend = name, attempts, "Circuit open, not attempting");
                    return finish(attempts, Err(err));
                }
            };

            attempts += 1;
            debug!(backend = name, attempt = attempts, "Calling backend");
            let t0 = self.clock.now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(backend.timeout, operation()) => Some(r),
            };
            let latency = self.clock.now().saturating_duration_since(t0);

            let result = match result {
                None => {
                    self.breaker.release(name, permit);
                    info!(backend = name, attempt = attempts, "Request cancelled mid-attempt");
                    return finish(attempts, Err(BackendError::Cancelled));
                }
                Some(Ok(r)) => r,
                Some(Err(_elapsed)) => Err(BackendError::Transient(format!(
                    "timed out after {}ms",
                    backend.timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(reply) => {
                    self.breaker.record_success(name, permit);
                    self.metrics.record_success(name, latency, reply.usage);
                    return finish(attempts, Ok(reply));
                }
                Err(BackendError::Cancelled) => {
                    self.breaker.release(name, permit);
                    return finish(attempts, Err(BackendError::Cancelled));
                }
                Err(err) => err,
            };

            self.metrics.record_failure(name, latency, &err);

            if err.is_fatal() {
                warn!(backend = name, error = %err, "Fatal backend error, not retrying");
                self.breaker.record_failure(name, permit);
                return finish(attempts, Err(err));
            }

            if permit == Permit::Trial {
                warn!(backend = name, error = %err, "Trial call failed");
                self.breaker.record_failure(name, permit);
                return finish(attempts, Err(err));
            }

            if attempts >= self.policy.max_attempts || !err.is_retryable() {
                warn!(backend = name, attempts, error = %err, "Retries exhausted");
                self.breaker.record_failure(name, permit);
                return finish(attempts, Err(err));
            }

            let delay = match &err {
                BackendError::RateLimited {
                    retry_after: Some(hint),
                } => {
                    if self.policy.hint_exceeds_limit(&err) {
                        warn!(
                            backend = name,
                            hint_ms = hint.as_millis() as u64,
                            "Rate-limit hint exceeds max delay, giving up on backend"
                        );
                        self.breaker.record_failure(name, permit);
                        return finish(attempts, Err(err));
                    }
                    *hint
                }
                _ => self.policy.backoff(attempts - 1, self.jitter.as_ref()),
            };

            info!(
                backend = name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(backend = name, "Request cancelled during backoff");
                    return finish(attempts, Err(BackendError::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{BreakerSettings, CircuitState};
    use std::sync::Mutex;

    fn reply(text: &str) -> BackendReply {
        BackendReply {
            text: text.into(),
            usage: None,
            model: "m".into(),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    fn controller(max_attempts: u32, threshold: u32) -> (RetryController, Arc<CircuitBreaker>, Arc<MetricsStore>) {
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings {
            failure_threshold: threshold,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }));
        let metrics = Arc::new(MetricsStore::new());
        let ctl = RetryController::new(policy(max_attempts), breaker.clone(), metrics.clone())
            .with_jitter(Arc::new(FixedJitter(0.0)));
        (ctl, breaker, metrics)
    }

    fn backend() -> BackendConfig {
        BackendConfig::new("a", "m", 0).with_timeout(Duration::from_secs(5))
    }

    /// Returns scripted results in order, then repeats the last one.
    struct Script {
        results: Mutex<Vec<Result<BackendReply, BackendError>>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(results: Vec<Result<BackendReply, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            })
        }

        fn next(&self) -> Result<BackendReply, BackendError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn transient() -> Result<BackendReply, BackendError> {
        Err(BackendError::Transient("HTTP 503".into()))
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(5);
        let j = FixedJitter(0.0);
        assert_eq!(p.backoff(0, &j), Duration::from_millis(100));
        assert_eq!(p.backoff(1, &j), Duration::from_millis(200));
        assert_eq!(p.backoff(2, &j), Duration::from_millis(400));
        assert_eq!(p.backoff(10, &j), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(3)
        };
        assert_eq!(p.backoff(1, &FixedJitter(0.0)), Duration::from_millis(100));
        assert_eq!(p.backoff(1, &FixedJitter(1.0)), Duration::from_millis(200));
        for _ in 0..50 {
            let d = p.backoff(1, &RandomJitter);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn hint_limit_only_applies_to_long_rate_limit_hints() {
        let p = policy(3);
        let limited = |secs| BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        };
        assert!(p.hint_exceeds_limit(&limited(3600)));
        assert!(!p.hint_exceeds_limit(&limited(0)));
        assert!(!p.hint_exceeds_limit(&BackendError::RateLimited { retry_after: None }));
        assert!(!p.hint_exceeds_limit(&BackendError::Transient("slow".into())));
        assert!(p.hint_exceeds_limit(&BackendError::RateLimited {
            retry_after: Some(Duration::MAX),
        }));
    }

    #[test]
    fn policy_from_config_clamps() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            multiplier: 0.5,
            ..RetryConfig::default()
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.multiplier, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let (ctl, breaker, metrics) = controller(3, 5);
        let script = Script::new(vec![transient(), transient(), Ok(reply("ok"))]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(script.calls(), 3);
        assert_eq!(breaker.snapshot("a").consecutive_failures, 0);
        let m = metrics.snapshot("a");
        assert_eq!((m.calls, m.errors), (3, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_one_breaker_failure() {
        let (ctl, breaker, _) = controller(3, 5);
        let script = Script::new(vec![transient()]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Transient));
        assert_eq!(script.calls(), 3);
        assert_eq!(breaker.snapshot("a").consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_is_never_retried() {
        let (ctl, breaker, _) = controller(3, 5);
        let script = Script::new(vec![Err(BackendError::Auth("bad key".into()))]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Auth));
        assert_eq!(script.calls(), 1);
        assert_eq!(breaker.snapshot("a").consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_skips_operation() {
        let (ctl, breaker, _) = controller(3, 1);
        breaker.record_failure("a", Permit::Normal);
        let script = Script::new(vec![Ok(reply("never"))]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::CircuitOpen));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(script.calls(), 0);
        // Rejection is not a new failure
        assert_eq!(breaker.snapshot("a").consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_honoured() {
        let (ctl, _, _) = controller(2, 5);
        let script = Script::new(vec![
            Err(BackendError::RateLimited {
                retry_after: Some(Duration::from_millis(1500)),
            }),
            Ok(reply("ok")),
        ]);
        let s = script.clone();
        let start = tokio::time::Instant::now();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert!(outcome.is_success());
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert!(start.elapsed() < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_beyond_max_delay_gives_up() {
        let (ctl, _, _) = controller(3, 5);
        let script = Script::new(vec![Err(BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        })]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::RateLimit));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient() {
        let (ctl, _, metrics) = controller(2, 5);
        let cfg = backend().with_timeout(Duration::from_millis(50));
        let outcome = ctl
            .execute(&cfg, &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(reply("late"))
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Transient));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(metrics.snapshot("a").errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_without_breaker_failure() {
        let (ctl, breaker, _) = controller(5, 5);
        let script = Script::new(vec![transient()]);
        let cancel = CancellationToken::new();

        let s = script.clone();
        let c = cancel.clone();
        let outcome = ctl
            .execute(&backend(), &cancel, move || {
                let s = s.clone();
                let c = c.clone();
                async move {
                    // Cancel as soon as the first attempt fails
                    c.cancel();
                    s.next()
                }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Cancelled));
        assert_eq!(script.calls(), 1);
        assert_eq!(breaker.snapshot("a").consecutive_failures, 0);
        assert_eq!(breaker.state("a"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_attempt_releases_trial() {
        let (ctl, breaker, _) = controller(3, 1);
        let clock_skip = breaker.settings().base_cooldown;
        breaker.record_failure("a", Permit::Normal);
        tokio::time::advance(clock_skip).await;

        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.cancel();
        });
        let outcome = ctl
            .execute(&backend(), &cancel, || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(reply("slow"))
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Cancelled));
        let snap = breaker.snapshot("a");
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_makes_no_attempt() {
        let (ctl, _, _) = controller(3, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let script = Script::new(vec![Ok(reply("x"))]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &cancel, || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;
        assert_eq!(outcome.error_class(), Some(ErrorClass::Cancelled));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_is_not_retried() {
        let (ctl, breaker, _) = controller(3, 1);
        breaker.record_failure("a", Permit::Normal);
        tokio::time::advance(Duration::from_secs(30)).await;

        let script = Script::new(vec![transient()]);
        let s = script.clone();
        let outcome = ctl
            .execute(&backend(), &CancellationToken::new(), || {
                let s = s.clone();
                async move { s.next() }
            })
            .await;

        assert_eq!(outcome.error_class(), Some(ErrorClass::Transient));
        assert_eq!(script.calls(), 1);
        let snap = breaker.snapshot("a");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.cooldown, Duration::from_secs(60));
    }
}
