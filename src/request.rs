//! Proposed units of work submitted for pricing and authorization.

use serde::{Deserialize, Serialize};

use crate::budget::Budget;
use crate::error::ValidationError;

/// A proposed unit of work: one model invocation, optionally fanned out
/// across agents and rounds, optionally calling priced tools.
///
/// # Invariants
/// - `model_name` is non-empty
/// - `agent_count >= 1` and `rounds >= 1`
/// - `difficulty_score` and `soft_limit_threshold` lie in `[0, 1]` when set
///
/// Whether `model_name` resolves in the rate catalog is checked by the
/// pricer, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestSpec")]
pub struct RequestPayload {
    model_name: String,
    prompt: String,
    estimated_output_tokens: Option<u64>,
    max_budget: Budget,
    agent_count: u32,
    rounds: u32,
    tool_calls: Vec<serde_json::Value>,
    difficulty_score: Option<f64>,
    soft_limit_threshold: Option<f64>,
    min_capability_tier: Option<u8>,
}

impl RequestPayload {
    /// Create a single-agent, single-round request with no budget.
    pub fn new(model_name: impl Into<String>, prompt: impl Into<String>) -> Result<Self, ValidationError> {
        let model_name = model_name.into();
        if model_name.trim().is_empty() {
            return Err(ValidationError::EmptyModelName);
        }
        Ok(Self {
            model_name,
            prompt: prompt.into(),
            estimated_output_tokens: None,
            max_budget: Budget::unconstrained(),
            agent_count: 1,
            rounds: 1,
            tool_calls: Vec::new(),
            difficulty_score: None,
            soft_limit_threshold: None,
            min_capability_tier: None,
        })
    }

    pub fn with_output_tokens(mut self, tokens: u64) -> Self {
        self.estimated_output_tokens = Some(tokens);
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.max_budget = budget;
        self
    }

    /// Set the multi-agent topology.
    pub fn with_fan_out(mut self, agent_count: u32, rounds: u32) -> Result<Self, ValidationError> {
        if agent_count == 0 {
            return Err(ValidationError::ZeroFanOut { field: "agent_count" });
        }
        if rounds == 0 {
            return Err(ValidationError::ZeroFanOut { field: "rounds" });
        }
        self.agent_count = agent_count;
        self.rounds = rounds;
        Ok(self)
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<serde_json::Value>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_difficulty(mut self, score: f64) -> Result<Self, ValidationError> {
        self.difficulty_score = Some(ValidationError::check_unit("difficulty_score", score)?);
        Ok(self)
    }

    pub fn with_soft_limit_threshold(mut self, threshold: f64) -> Result<Self, ValidationError> {
        self.soft_limit_threshold = Some(ValidationError::check_unit("soft_limit_threshold", threshold)?);
        Ok(self)
    }

    pub fn with_min_capability_tier(mut self, tier: u8) -> Self {
        self.min_capability_tier = Some(tier);
        self
    }

    /// Copy of this request targeting another model.
    pub fn with_model(&self, model_name: impl Into<String>) -> Result<Self, ValidationError> {
        let model_name = model_name.into();
        if model_name.trim().is_empty() {
            return Err(ValidationError::EmptyModelName);
        }
        Ok(Self {
            model_name,
            ..self.clone()
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn estimated_output_tokens(&self) -> Option<u64> {
        self.estimated_output_tokens
    }

    pub fn max_budget(&self) -> &Budget {
        &self.max_budget
    }

    pub fn agent_count(&self) -> u32 {
        self.agent_count
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn tool_calls(&self) -> &[serde_json::Value] {
        &self.tool_calls
    }

    pub fn difficulty_score(&self) -> Option<f64> {
        self.difficulty_score
    }

    pub fn soft_limit_threshold(&self) -> Option<f64> {
        self.soft_limit_threshold
    }

    pub fn min_capability_tier(&self) -> Option<u8> {
        self.min_capability_tier
    }
}

fn default_fan_out() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RequestSpec {
    model_name: String,
    prompt: String,
    #[serde(default)]
    estimated_output_tokens: Option<u64>,
    #[serde(default)]
    max_budget: Option<Budget>,
    #[serde(default = "default_fan_out")]
    agent_count: u32,
    #[serde(default = "default_fan_out")]
    rounds: u32,
    #[serde(default)]
    tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    difficulty_score: Option<f64>,
    #[serde(default)]
    soft_limit_threshold: Option<f64>,
    #[serde(default)]
    min_capability_tier: Option<u8>,
}

impl TryFrom<RequestSpec> for RequestPayload {
    type Error = ValidationError;

    fn try_from(spec: RequestSpec) -> Result<Self, Self::Error> {
        let mut request = RequestPayload::new(spec.model_name, spec.prompt)?
            .with_budget(spec.max_budget.unwrap_or_default())
            .with_fan_out(spec.agent_count, spec.rounds)?
            .with_tool_calls(spec.tool_calls.unwrap_or_default());
        if let Some(tokens) = spec.estimated_output_tokens {
            request = request.with_output_tokens(tokens);
        }
        if let Some(score) = spec.difficulty_score {
            request = request.with_difficulty(score)?;
        }
        if let Some(threshold) = spec.soft_limit_threshold {
            request = request.with_soft_limit_threshold(threshold)?;
        }
        if let Some(tier) = spec.min_capability_tier {
            request = request.with_min_capability_tier(tier);
        }
        Ok(request)
    }
}
