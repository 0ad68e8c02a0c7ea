//! # DocForge Core
//!
//! Domain types, traits, and error definitions for the DocForge document
//! generation engine. This crate has no network or storage dependencies; it
//! defines the model that the provider, telemetry and engine crates build on.
//!
//! ## Design Philosophy
//!
//! Every remote AI backend is reached through the single [`Backend`] trait.
//! Orchestration, retries and context assembly are written against that
//! trait only, so adapters can be swapped by configuration and replaced by
//! mocks in tests.

pub mod clock;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BackendError, ErrorClass};
pub use message::{Message, Role};
pub use provider::{Backend, BackendReply, Usage};
