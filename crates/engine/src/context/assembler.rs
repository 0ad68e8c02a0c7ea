//! Context assembly: rank candidate sources and pack them into a budget.
//!
//! 1. Score each source as `wq * quality + wf * freshness` under the chosen
//!    [`Strategy`].
//! 2. Sort descending by score; ties go to kind precedence
//!    (metadata > template > dependency), then input order.
//! 3. Walk the ranking once. A source that fits the remaining budget is
//!    taken whole; one that does not is skipped and the walk continues, so
//!    smaller lower-ranked sources can still fill the tail.
//!
//! Sources are never truncated. Separators are formatting only and do not
//! count against the budget.
//!
//! # Determinism
//!
//! Identical inputs always produce identical output. No random or
//! time-dependent logic is used during assembly.

use crate::context::source::ContextSource;
use crate::context::strategy::Strategy;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub const REASON_TOP_MATCH: &str = "included: highest quality match";
pub const REASON_FITS: &str = "included: fits remaining budget";
pub const REASON_EXHAUSTED: &str = "excluded: token budget exhausted";
pub const REASON_TOO_LARGE: &str = "excluded: exceeds entire token budget";
pub const REASON_EMPTY: &str = "excluded: empty content";

// ── Types ─────────────────────────────────────────────────────────────────

/// The decision made for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub source_id: String,
    pub included: bool,
    /// Tokens this source consumed (0 when excluded)
    pub tokens_used: usize,
    /// Effective score added to the context (0 when excluded)
    pub quality_contribution: f64,
    pub reason: String,
}

/// The packed context plus a full account of how it was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBuildResult {
    pub context: String,
    pub total_tokens: usize,
    pub budget: usize,
    pub strategy: String,
    pub target_backend: String,
    pub target_model: String,
    /// One entry per input source, in ranking order
    pub trace: Vec<TraceEntry>,
}

impl ContextBuildResult {
    pub fn included(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter().filter(|t| t.included)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter().filter(|t| !t.included)
    }

    /// Budget utilization percentage (0.0–100.0).
    pub fn utilization_pct(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.budget as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    /// Packing produced more tokens than allowed. Indicates a bug.
    #[error("Assembled context ({total} tokens) exceeds budget ({budget} tokens)")]
    BudgetExceeded { total: usize, budget: usize },
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Stateless context assembler. Create one and reuse it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler {
    strategy: Strategy,
}

impl ContextAssembler {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Rank and pack `sources` into `token_budget` for the given target.
    pub fn build(
        &self,
        target_backend: &str,
        target_model: &str,
        sources: &[ContextSource],
        token_budget: usize,
    ) -> Result<ContextBuildResult, AssemblyError> {
        let ranked = self.rank(sources);

        let mut remaining = token_budget;
        let mut trace = Vec::with_capacity(sources.len());
        let mut sections: Vec<String> = Vec::new();

        for (score, source) in ranked {
            let decision = if source.is_empty() {
                Err(REASON_EMPTY)
            } else if source.tokens > token_budget {
                Err(REASON_TOO_LARGE)
            } else if source.tokens > remaining {
                Err(REASON_EXHAUSTED)
            } else if sections.is_empty() {
                Ok(REASON_TOP_MATCH)
            } else {
                Ok(REASON_FITS)
            };

            let entry = match decision {
                Ok(reason) => {
                    remaining -= source.tokens;
                    sections.push(format!(
                        "--- [{}] {} ---\n{}",
                        source.kind.label(),
                        source.id,
                        source.text.trim_end()
                    ));
                    TraceEntry {
                        source_id: source.id.clone(),
                        included: true,
                        tokens_used: source.tokens,
                        quality_contribution: score,
                        reason: reason.into(),
                    }
                }
                Err(reason) => {
                    debug!(source = %source.id, tokens = source.tokens, remaining, reason, "Source skipped");
                    TraceEntry {
                        source_id: source.id.clone(),
                        included: false,
                        tokens_used: 0,
                        quality_contribution: 0.0,
                        reason: reason.into(),
                    }
                }
            };
            trace.push(entry);
        }

        let total_tokens: usize = trace.iter().map(|t| t.tokens_used).sum();
        if total_tokens > token_budget {
            error!(
                total_tokens,
                budget = token_budget,
                "Context assembly invariant violated: budget exceeded"
            );
            return Err(AssemblyError::BudgetExceeded {
                total: total_tokens,
                budget: token_budget,
            });
        }

        debug!(
            backend = target_backend,
            model = target_model,
            strategy = %self.strategy,
            included = sections.len(),
            total = sources.len(),
            total_tokens,
            budget = token_budget,
            "Context assembled"
        );

        Ok(ContextBuildResult {
            context: sections.join("\n\n"),
            total_tokens,
            budget: token_budget,
            strategy: self.strategy.name().into(),
            target_backend: target_backend.into(),
            target_model: target_model.into(),
            trace,
        })
    }

    /// Sources with their effective scores, best first.
    fn rank<'a>(&self, sources: &'a [ContextSource]) -> Vec<(f64, &'a ContextSource)> {
        let mut ranked: Vec<(usize, f64, &ContextSource)> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (i, self.strategy.score(s.quality, s.freshness), s))
            .collect();
        ranked.sort_by(|(ia, sa, a), (ib, sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| ia.cmp(ib))
        });
        ranked.into_iter().map(|(_, score, s)| (score, s)).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
