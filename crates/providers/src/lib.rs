//! Backend adapters and request orchestration for DocForge.
//!
//! All adapters implement the `docforge_core::Backend` trait. The
//! orchestrator picks usable backends from the registry in priority order
//! and runs each one through the retry controller, which consults the
//! per-backend circuit breaker before every attempt.

pub mod anthropic;
pub mod circuit_breaker;
pub mod http;
pub mod openai_compat;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod router;

pub use anthropic::AnthropicBackend;
pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitSnapshot, CircuitState, Permit};
pub use openai_compat::OpenAiCompatBackend;
pub use orchestrator::{
    BackendFailure, BackendHealth, BackendOrchestrator, DispatchRequest, Dispatched,
    HealthSnapshot, OrchestratorBuilder, OrchestratorError,
};
pub use registry::{BackendConfig, BackendRegistry, Credential, RegisteredBackend};
pub use retry::{CallOutcome, FixedJitter, Jitter, RandomJitter, RetryController, RetryPolicy};
pub use router::{build_orchestrator, build_registry};
