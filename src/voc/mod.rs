//! Value-of-computation stopping decisions.
//!
//! The engine looks at the last two steps of a reasoning trace. When they
//! have converged (similarity at or above the threshold) further compute is
//! unlikely to change the answer and the engine recommends stopping.
//!
//! # Opportunity cost
//! When the caller reports a budget that is nearly spent, the threshold is
//! lowered by 10%: converged-enough answers are accepted sooner once
//! compute becomes scarce.

mod similarity;

pub use similarity::{LcsRatio, SimilarityMeasure};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::budget::{Budget, Dimension};
use crate::error::ValidationError;
use similarity::clamp_score;

/// Ordered reasoning steps produced by an upstream process.
///
/// Append-only from the caller's side; the engine only borrows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn push(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The previous and the latest step, if there are at least two.
    fn last_two(&self) -> Option<(&str, &str)> {
        match self.steps.as_slice() {
            [.., prev, last] => Some((prev.as_str(), last.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VocDecision {
    Continue,
    Stop,
}

impl fmt::Display for VocDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("CONTINUE"),
            Self::Stop => f.write_str("STOP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocResult {
    pub decision: VocDecision,
    /// Convergence score in `[0, 1]`
    pub score: f64,
    pub reason: String,
    /// Threshold actually applied, after any opportunity-cost adjustment
    pub threshold: f64,
}

/// Per-call overrides for [`VocEngine::evaluate_with`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VocOptions {
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub remaining_budget: Option<Budget>,
    #[serde(default)]
    pub total_budget: Option<Budget>,
}

/// Decides whether another reasoning step is worth its cost.
pub struct VocEngine {
    threshold: f64,
    measure: Box<dyn SimilarityMeasure>,
}

impl VocEngine {
    pub const DEFAULT_THRESHOLD: f64 = 0.95;
    /// Remaining/total ratio below which a dimension counts as scarce.
    pub const SCARCITY_RATIO: f64 = 0.2;
    /// Threshold multiplier applied when compute is scarce.
    pub const OPPORTUNITY_DISCOUNT: f64 = 0.9;

    pub fn new() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            measure: Box::new(LcsRatio),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, ValidationError> {
        self.threshold = ValidationError::check_unit("threshold", threshold)?;
        Ok(self)
    }

    pub fn with_measure(mut self, measure: impl SimilarityMeasure + 'static) -> Self {
        self.measure = Box::new(measure);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate convergence with the configured threshold.
    pub fn evaluate(&self, trace: &ReasoningTrace) -> VocResult {
        self.decide(trace, self.threshold, None)
    }

    /// Evaluate convergence with per-call overrides.
    ///
    /// # Errors
    /// A threshold override outside `[0, 1]`.
    pub fn evaluate_with(&self, trace: &ReasoningTrace, options: &VocOptions) -> Result<VocResult, ValidationError> {
        let base = match options.threshold {
            Some(t) => ValidationError::check_unit("threshold", t)?,
            None => self.threshold,
        };
        let scarce = match (&options.remaining_budget, &options.total_budget) {
            (Some(remaining), Some(total)) => scarce_dimension(remaining, total),
            _ => None,
        };
        let threshold = if scarce.is_some() {
            base * Self::OPPORTUNITY_DISCOUNT
        } else {
            base
        };
        Ok(self.decide(trace, threshold, scarce))
    }

    fn decide(&self, trace: &ReasoningTrace, threshold: f64, scarce: Option<Dimension>) -> VocResult {
        let Some((prev, last)) = trace.last_two() else {
            return VocResult {
                decision: VocDecision::Continue,
                score: 0.0,
                reason: "Need at least two reasoning steps to measure convergence".to_string(),
                threshold,
            };
        };

        let score = clamp_score(self.measure.similarity(prev, last));
        let (decision, mut reason) = if score >= threshold {
            (
                VocDecision::Stop,
                format!(
                    "Diminishing returns: similarity {:.4} >= threshold {:.4}",
                    score, threshold
                ),
            )
        } else {
            (
                VocDecision::Continue,
                format!(
                    "Reasoning still evolving: similarity {:.4} < threshold {:.4}",
                    score, threshold
                ),
            )
        };
        if let Some(dim) = scarce {
            reason.push_str(&format!(
                " (threshold lowered for opportunity cost: {} budget below {:.0}% remaining)",
                dim.label(),
                Self::SCARCITY_RATIO * 100.0
            ));
        }

        tracing::debug!(
            steps = trace.len(),
            score,
            threshold,
            decision = %decision,
            "VOC evaluated"
        );
        VocResult {
            decision,
            score,
            reason,
            threshold,
        }
    }
}

impl Default for VocEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VocEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VocEngine")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// First dimension whose remaining amount is below the scarcity ratio of a
/// positive total.
fn scarce_dimension(remaining: &Budget, total: &Budget) -> Option<Dimension> {
    Dimension::ALL.into_iter().find(|&dim| {
        match (remaining.limit(dim), total.limit(dim)) {
            (Some(left), Some(all)) if all > 0.0 => left < all * VocEngine::SCARCITY_RATIO,
            _ => false,
        }
    })
}
