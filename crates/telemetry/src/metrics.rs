//! Thread-safe metrics store: one lock per backend.

use crate::model::{BackendMetrics, LastError, MetricsSnapshot};
use chrono::Utc;
use docforge_core::{BackendError, Usage};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Process-wide call counters keyed by backend name.
///
/// The outer map is only write-locked when a backend is seen for the first
/// time; every update after that locks just that backend's entry.
#[derive(Debug, Default)]
pub struct MetricsStore {
    backends: RwLock<HashMap<String, Arc<Mutex<BackendMetrics>>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with entries for the given backends already in place.
    pub fn with_backends<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::new();
        for name in names {
            store.entry(name);
        }
        store
    }

    fn entry(&self, backend: &str) -> Arc<Mutex<BackendMetrics>> {
        {
            let map = self.backends.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = map.get(backend) {
                return entry.clone();
            }
        }
        let mut map = self.backends.write().unwrap_or_else(|e| e.into_inner());
        map.entry(backend.to_string()).or_default().clone()
    }

    /// Record a successful call.
    pub fn record_success(&self, backend: &str, latency: Duration, usage: Option<Usage>) {
        let entry = self.entry(backend);
        let mut m = entry.lock().unwrap_or_else(|e| e.into_inner());
        m.calls += 1;
        m.total_latency += latency;
        if let Some(usage) = usage {
            m.tokens += u64::from(usage.total_tokens);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, backend: &str, latency: Duration, error: &BackendError) {
        let entry = self.entry(backend);
        let mut m = entry.lock().unwrap_or_else(|e| e.into_inner());
        m.calls += 1;
        m.errors += 1;
        m.total_latency += latency;
        m.last_error = Some(LastError {
            class: error.class(),
            message: error.to_string(),
            at: Utc::now(),
        });
        m.note_error_class(error.class());
        tracing::debug!(
            backend,
            class = %error.class(),
            errors = m.errors,
            "Recorded backend failure"
        );
    }

    /// Snapshot one backend. Unknown backends read as all-zero.
    pub fn snapshot(&self, backend: &str) -> MetricsSnapshot {
        let map = self.backends.read().unwrap_or_else(|e| e.into_inner());
        match map.get(backend) {
            Some(entry) => entry.lock().unwrap_or_else(|e| e.into_inner()).snapshot(),
            None => MetricsSnapshot::default(),
        }
    }

    /// Snapshot every known backend, sorted by name.
    pub fn snapshot_all(&self) -> BTreeMap<String, MetricsSnapshot> {
        let entries: Vec<(String, Arc<Mutex<BackendMetrics>>)> = {
            let map = self.backends.read().unwrap_or_else(|e| e.into_inner());
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        entries
            .into_iter()
            .map(|(name, entry)| {
                let snap = entry.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
                (name, snap)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RECENT_ERROR_CAP;
    use docforge_core::ErrorClass;

    #[test]
    fn counts_success_and_failure() {
        let store = MetricsStore::new();
        store.record_success(
            "a",
            Duration::from_millis(100),
            Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        );
        store.record_failure(
            "a",
            Duration::from_millis(300),
            &BackendError::Transient("reset".into()),
        );

        let snap = store.snapshot("a");
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.tokens, 15);
        assert!((snap.avg_latency_ms - 200.0).abs() < 1e-6);
        let last = snap.last_error.unwrap();
        assert_eq!(last.class, ErrorClass::Transient);
        assert!(last.message.contains("reset"));
    }

    #[test]
    fn unknown_backend_is_zero() {
        let store = MetricsStore::new();
        assert_eq!(store.snapshot("nope"), MetricsSnapshot::default());
        assert!(store.snapshot_all().is_empty());
    }

    #[test]
    fn preregistered_backends_appear_in_snapshot() {
        let store = MetricsStore::with_backends(["b", "a"]);
        let all = store.snapshot_all();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn recent_errors_stay_bounded() {
        let store = MetricsStore::new();
        let errors = [
            BackendError::Transient("t".into()),
            BackendError::RateLimited { retry_after: None },
            BackendError::Auth("a".into()),
            BackendError::Configuration("c".into()),
            BackendError::Transient("t2".into()),
            BackendError::CircuitOpen { backend: "x".into() },
        ];
        for err in &errors {
            store.record_failure("x", Duration::ZERO, err);
        }
        let snap = store.snapshot("x");
        assert_eq!(snap.recent_errors.len(), RECENT_ERROR_CAP);
        assert_eq!(snap.recent_errors.last(), Some(&ErrorClass::CircuitOpen));
        assert!(!snap.recent_errors.contains(&ErrorClass::RateLimit));
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(MetricsStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let name = if i % 2 == 0 { "even" } else { "odd" };
                for _ in 0..100 {
                    store.record_success(name, Duration::from_millis(1), None);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.snapshot("even").calls, 400);
        assert_eq!(store.snapshot("odd").calls, 400);
    }
}
