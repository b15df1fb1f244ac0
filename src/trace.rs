//! The economic trace: an auditable record of one pricing decision.
//!
//! Field names are part of the integration contract with downstream
//! consumers; rename nothing without versioning the wire format.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::{Alternative, CostEstimate};
use crate::error::{EconomistError, Result};

/// Verdict recorded on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
    /// Approved, with a cheaper alternative the caller may opt into
    Modified,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Modified => "MODIFIED",
        };
        f.write_str(s)
    }
}

/// Audit record of a single `check_execution` call.
///
/// Immutable after creation except for one write of `actual_cost` during
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicTrace {
    id: Uuid,
    created_at: DateTime<Utc>,
    estimated_cost: CostEstimate,
    actual_cost: Option<CostEstimate>,
    decision: Decision,
    reason: String,
    suggested_alternative: Option<Alternative>,
    model_used: String,
    input_tokens: u64,
    #[serde(default = "single_round")]
    rounds: u32,
    budget_warning: bool,
    warning_message: Option<String>,
    tokens_per_dollar: f64,
    tokens_per_second: f64,
    latency_per_token: f64,
}

impl EconomicTrace {
    pub(crate) fn new(
        model_used: impl Into<String>,
        input_tokens: u64,
        estimated_cost: CostEstimate,
        decision: Decision,
        reason: impl Into<String>,
    ) -> Self {
        let mut trace = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            estimated_cost,
            actual_cost: None,
            decision,
            reason: reason.into(),
            suggested_alternative: None,
            model_used: model_used.into(),
            input_tokens,
            rounds: 1,
            budget_warning: false,
            warning_message: None,
            tokens_per_dollar: 0.0,
            tokens_per_second: 0.0,
            latency_per_token: 0.0,
        };
        trace.refresh_metrics();
        trace
    }

    pub(crate) fn with_alternative(mut self, alternative: Option<Alternative>) -> Self {
        self.suggested_alternative = alternative;
        self
    }

    /// Rounds the priced request ran for. Realized token volume covers all of them.
    pub(crate) fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    pub(crate) fn with_warning(mut self, message: Option<String>) -> Self {
        self.budget_warning = message.is_some();
        self.warning_message = message;
        self
    }

    /// Record the realized cost. Allowed once.
    pub(crate) fn record_actual(&mut self, actual: CostEstimate) -> Result<()> {
        if self.actual_cost.is_some() {
            return Err(EconomistError::AlreadyReconciled(self.id));
        }
        self.actual_cost = Some(actual);
        self.refresh_metrics();
        Ok(())
    }

    /// Recompute efficiency metrics from the actual cost, else the estimate.
    fn refresh_metrics(&mut self) {
        let basis = self.actual_cost.unwrap_or(self.estimated_cost);
        let tokens = basis.token_volume() as f64;
        let financial = basis.financial();
        let latency_ms = basis.latency_ms() as f64;

        self.tokens_per_dollar = if financial > 0.0 { tokens / financial } else { 0.0 };
        self.tokens_per_second = if latency_ms > 0.0 {
            tokens / (latency_ms / 1000.0)
        } else {
            0.0
        };
        self.latency_per_token = if tokens > 0.0 { latency_ms / tokens } else { 0.0 };
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn estimated_cost(&self) -> &CostEstimate {
        &self.estimated_cost
    }

    pub fn actual_cost(&self) -> Option<&CostEstimate> {
        self.actual_cost.as_ref()
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn suggested_alternative(&self) -> Option<&Alternative> {
        self.suggested_alternative.as_ref()
    }

    pub fn model_used(&self) -> &str {
        &self.model_used
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn budget_warning(&self) -> bool {
        self.budget_warning
    }

    pub fn warning_message(&self) -> Option<&str> {
        self.warning_message.as_deref()
    }

    pub fn tokens_per_dollar(&self) -> f64 {
        self.tokens_per_dollar
    }

    pub fn tokens_per_second(&self) -> f64 {
        self.tokens_per_second
    }

    pub fn latency_per_token(&self) -> f64 {
        self.latency_per_token
    }

    pub fn is_reconciled(&self) -> bool {
        self.actual_cost.is_some()
    }
}

fn single_round() -> u32 {
    1
}
