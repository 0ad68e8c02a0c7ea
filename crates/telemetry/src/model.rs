//! Data model for backend metrics and their read-only snapshots.

use chrono::{DateTime, Utc};
use docforge_core::ErrorClass;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// How many distinct recent error categories are kept per backend.
pub const RECENT_ERROR_CAP: usize = 4;

/// The most recent error seen on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Mutable running counters for one backend.
#[derive(Debug, Default)]
pub(crate) struct BackendMetrics {
    pub calls: u64,
    pub errors: u64,
    pub total_latency: Duration,
    pub tokens: u64,
    pub last_error: Option<LastError>,
    /// Distinct categories, most recent last.
    pub recent_errors: VecDeque<ErrorClass>,
}

impl BackendMetrics {
    pub fn note_error_class(&mut self, class: ErrorClass) {
        self.recent_errors.retain(|c| *c != class);
        self.recent_errors.push_back(class);
        while self.recent_errors.len() > RECENT_ERROR_CAP {
            self.recent_errors.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let avg_latency_ms = if self.calls == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.calls as f64
        };
        MetricsSnapshot {
            calls: self.calls,
            errors: self.errors,
            avg_latency_ms,
            tokens: self.tokens,
            last_error: self.last_error.clone(),
            recent_errors: self.recent_errors.iter().copied().collect(),
        }
    }
}

/// A point-in-time copy of one backend's counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub recent_errors: Vec<ErrorClass>,
}

impl MetricsSnapshot {
    /// Fraction of calls that failed (0.0 when no calls).
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}
