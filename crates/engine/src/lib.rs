//! DocForge engine: context assembly and the request facade.
//!
//! The facade is the single entry point for document generation. It packs
//! the caller's context sources into a budget, builds the backend messages
//! and hands them to the backend orchestrator.

pub mod context;
pub mod facade;

pub use context::{
    AssemblyError, ContextAssembler, ContextBuildResult, ContextSource, SourceKind, Strategy,
    TraceEntry,
};
pub use facade::{GenerateError, GenerateRequest, GenerateResult, RequestFacade};
