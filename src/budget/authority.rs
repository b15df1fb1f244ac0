//! Budget authorization.
//!
//! The authority compares a [`CostEstimate`] against a [`Budget`] and
//! renders a verdict. It never mutates the budget: a budget is a ceiling,
//! not a ledger.

use serde::{Deserialize, Serialize};

use super::budget::{Budget, CostEstimate, Dimension};
use crate::error::ValidationError;
use crate::trace::Decision;

/// Verdict of a single budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    /// `Approved` or `Rejected`; the authority never emits `Modified`
    pub decision: Decision,
    pub reason: String,
    /// First exceeded dimension, in check order
    pub violated: Option<Dimension>,
    /// Soft-limit warnings on an approved estimate
    pub warnings: Vec<String>,
}

impl Authorization {
    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approved
    }

    /// Warnings joined into one message, if any.
    pub fn warning_message(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(self.warnings.join("; "))
        }
    }
}

/// Approves or rejects estimates against budgets.
#[derive(Debug, Clone)]
pub struct BudgetAuthority {
    soft_limit_threshold: f64,
}

impl BudgetAuthority {
    /// Ratio of estimate to limit above which an approval carries a warning.
    pub const DEFAULT_SOFT_LIMIT: f64 = 0.8;

    pub fn new() -> Self {
        Self {
            soft_limit_threshold: Self::DEFAULT_SOFT_LIMIT,
        }
    }

    pub fn with_soft_limit_threshold(mut self, threshold: f64) -> Result<Self, ValidationError> {
        self.soft_limit_threshold = ValidationError::check_unit("soft_limit_threshold", threshold)?;
        Ok(self)
    }

    pub fn soft_limit_threshold(&self) -> f64 {
        self.soft_limit_threshold
    }

    /// Check `estimate` against `budget` with the default soft limit.
    pub fn authorize(&self, estimate: &CostEstimate, budget: &Budget) -> Authorization {
        self.authorize_with_threshold(estimate, budget, None)
    }

    /// Check `estimate` against `budget`, optionally overriding the soft limit.
    ///
    /// Dimensions are checked financial, latency, token volume; the first
    /// one exceeded decides the reason. Unset dimensions are skipped.
    pub fn authorize_with_threshold(
        &self,
        estimate: &CostEstimate,
        budget: &Budget,
        soft_limit: Option<f64>,
    ) -> Authorization {
        for dim in Dimension::ALL {
            if !budget.exceeded_by(dim, estimate) {
                continue;
            }
            let value = estimate.format_value(dim);
            let limit = budget.format_limit(dim).unwrap_or_default();
            tracing::debug!(dimension = %dim, %value, %limit, "Budget exceeded");
            return Authorization {
                decision: Decision::Rejected,
                reason: format!(
                    "{} budget exceeded: estimated {} > limit {}",
                    dim.label(),
                    value,
                    limit
                ),
                violated: Some(dim),
                warnings: Vec::new(),
            };
        }

        let threshold = soft_limit.unwrap_or(self.soft_limit_threshold);
        let warnings: Vec<String> = Dimension::ALL
            .into_iter()
            .filter_map(|dim| {
                let limit = budget.limit(dim).filter(|l| *l > 0.0)?;
                let value = estimate.value(dim);
                let ratio = value / limit;
                (ratio > threshold).then(|| {
                    format!(
                        "{} budget at {:.1}% ({}/{})",
                        dim.label(),
                        ratio * 100.0,
                        estimate.format_value(dim),
                        budget.format_limit(dim).unwrap_or_default()
                    )
                })
            })
            .collect();

        let reason = if warnings.is_empty() {
            "Budget check passed."
        } else {
            "Approved with warnings."
        };

        Authorization {
            decision: Decision::Approved,
            reason: reason.to_string(),
            violated: None,
            warnings,
        }
    }
}

impl Default for BudgetAuthority {
    fn default() -> Self {
        Self::new()
    }
}
