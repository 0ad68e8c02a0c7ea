//! Named scoring strategies for context selection.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How quality and freshness are weighted into one effective score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    QualityFirst,
    Balanced,
    FreshnessFirst,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Self::QualityFirst, Self::Balanced, Self::FreshnessFirst];

    /// `(quality_weight, freshness_weight)`, summing to 1.
    pub fn weights(&self) -> (f64, f64) {
        match self {
            Self::QualityFirst => (0.8, 0.2),
            Self::Balanced => (0.5, 0.5),
            Self::FreshnessFirst => (0.2, 0.8),
        }
    }

    pub fn score(&self, quality: f64, freshness: f64) -> f64 {
        let (wq, wf) = self.weights();
        wq * quality + wf * freshness
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::QualityFirst => "quality_first",
            Self::Balanced => "balanced",
            Self::FreshnessFirst => "freshness_first",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown assembly strategy '{0}' (expected quality_first, balanced or freshness_first)")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|st| st.name() == normalized)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}
