//! Per-backend call metrics for DocForge.
//!
//! Counts calls, errors and latency for every backend the orchestrator
//! talks to, and keeps a short list of recent error categories for
//! health checks. Each backend's counters sit behind their own lock so
//! traffic to one backend never waits on another.

pub mod metrics;
pub mod model;

pub use metrics::MetricsStore;
pub use model::{LastError, MetricsSnapshot, RECENT_ERROR_CAP};
