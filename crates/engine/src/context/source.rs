//! Candidate context sources.

use crate::context::token::estimate_tokens;
use serde::{Deserialize, Serialize};

/// Where a piece of candidate context came from.
///
/// Declaration order is tie-break precedence: metadata beats templates,
/// templates beat dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ProjectMetadata,
    Template,
    Dependency,
}

impl SourceKind {
    /// Human label used in context separators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProjectMetadata => "Project Metadata",
            Self::Template => "Template",
            Self::Dependency => "Dependency",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One unit of text competing for a place in the assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub id: String,
    pub kind: SourceKind,
    pub text: String,
    /// Estimated token cost of `text`
    pub tokens: usize,
    /// Relevance score in [0, 1]
    pub quality: f64,
    /// Recency score in [0, 1]
    pub freshness: f64,
}

impl ContextSource {
    /// A source with its token cost estimated from `text` and neutral scores.
    pub fn new(id: impl Into<String>, kind: SourceKind, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            kind,
            tokens: estimate_tokens(&text),
            text,
            quality: 0.5,
            freshness: 0.5,
        }
    }

    /// Scores are clamped into [0, 1]; NaN becomes 0.
    pub fn with_scores(mut self, quality: f64, freshness: f64) -> Self {
        self.quality = clamp_unit(quality);
        self.freshness = clamp_unit(freshness);
        self
    }

    /// Override the estimated token count with one computed upstream.
    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
