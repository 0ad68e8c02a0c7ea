//! Token-budgeted context assembly.
//!
//! Candidate sources (project metadata, templates, prior documents) are
//! scored, ranked and packed whole into a fixed token budget. Every source
//! gets a trace entry explaining why it was included or left out.

pub mod assembler;
pub mod source;
pub mod strategy;
pub mod token;

pub use assembler::{AssemblyError, ContextAssembler, ContextBuildResult, TraceEntry};
pub use source::{ContextSource, SourceKind};
pub use strategy::{Strategy, UnknownStrategy};
