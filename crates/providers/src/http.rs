//! Shared HTTP plumbing for the wire adapters.

use docforge_core::BackendError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tracing::warn;

/// Build the client shared by every adapter. Per-attempt timeouts are
/// enforced by the retry controller, so only connects are bounded here.
pub fn client() -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| BackendError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Parse a delta-seconds `Retry-After` header. HTTP-date values are ignored.
/// Values too large for a `Duration` saturate to `Duration::MAX`.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Classify a transport error.
pub(crate) fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::Configuration(format!("Invalid request: {err}"))
    } else {
        BackendError::Transient(format!("Network error: {err}"))
    }
}

/// Turn a non-2xx response into a classified error, consuming the body.
pub(crate) async fn check_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let hint = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    warn!(backend, status = status.as_u16(), body = %body, "Backend returned error");
    Err(BackendError::from_status(status.as_u16(), body, hint))
}

/// A 2xx body that did not parse. Proxies occasionally return garbage, so
/// this is retried.
pub(crate) fn decode_error(err: reqwest::Error) -> BackendError {
    BackendError::Transient(format!("Failed to parse response: {err}"))
}
