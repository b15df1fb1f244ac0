//! Pre-execution cost estimation.
//!
//! # Token counting
//! Input tokens are approximated as `chars / 4` (integer division over
//! Unicode scalar values). The same prompt always yields the same count.
//!
//! # Fan-out
//! Agents and rounds multiply spend linearly. Latency depends on
//! [`FanOutPolicy`]: with parallel agents only rounds add up.
//! Token and latency totals saturate at `u64::MAX` instead of wrapping.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::budget::CostEstimate;
use super::pricing::{RateCard, RateTable};
use crate::error::{Result, ValidationError};
use crate::request::RequestPayload;

/// Characters per token in the length proxy.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Approximate token count of `text`.
pub fn count_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / CHARS_PER_TOKEN
}

/// How agents within a round are assumed to execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Agents run concurrently: latency scales with rounds only.
    #[default]
    Parallel,
    /// Agents run one after another: latency scales with agents and rounds.
    Sequential,
}

impl FromStr for FanOutPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("expected 'parallel' or 'sequential', got '{}'", other)),
        }
    }
}

/// Estimates financial cost, latency and token volume of a request.
#[derive(Debug, Clone)]
pub struct Pricer {
    output_ratio: f64,
    fan_out: FanOutPolicy,
}

impl Pricer {
    /// Output is assumed to be this fraction of input when the caller gives no hint.
    pub const DEFAULT_OUTPUT_RATIO: f64 = 0.2;

    pub fn new() -> Self {
        Self {
            output_ratio: Self::DEFAULT_OUTPUT_RATIO,
            fan_out: FanOutPolicy::default(),
        }
    }

    /// Use a different output/input ratio for requests without an output hint.
    pub fn with_output_ratio(mut self, ratio: f64) -> std::result::Result<Self, ValidationError> {
        self.output_ratio = ValidationError::check_amount("output_ratio", ratio)?;
        Ok(self)
    }

    pub fn with_fan_out(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out = policy;
        self
    }

    pub fn output_ratio(&self) -> f64 {
        self.output_ratio
    }

    pub fn fan_out(&self) -> FanOutPolicy {
        self.fan_out
    }

    /// Heuristic output length for `input_tokens`.
    ///
    /// # Postcondition
    /// `result >= 1` whenever `input_tokens > 0`
    pub fn estimate_output_tokens(&self, input_tokens: u64) -> u64 {
        let estimated = ((input_tokens as f64) * self.output_ratio).floor() as u64;
        if input_tokens > 0 && estimated == 0 {
            1
        } else {
            estimated
        }
    }

    /// Total per-call cost of the tool calls in one agent-round.
    ///
    /// Accepts `{"name": ...}` and OpenAI-style `{"function": {"name": ...}}`.
    /// Unknown or unnamed tools are priced at zero.
    pub fn tools_cost(&self, table: &RateTable, tool_calls: &[serde_json::Value]) -> f64 {
        tool_calls
            .iter()
            .map(|call| match tool_name(call) {
                Some(name) => match table.tool(name) {
                    Some(rate) => rate.cost_per_call,
                    None => {
                        tracing::warn!(tool = name, "Unknown tool, assuming cost $0.0");
                        0.0
                    }
                },
                None => {
                    tracing::warn!("Could not determine tool name from call, assuming cost $0.0");
                    0.0
                }
            })
            .sum()
    }

    /// Latency of one agent in one round.
    pub fn round_latency_ms(&self, card: &RateCard, output_tokens: u64) -> f64 {
        card.baseline_latency_ms.unwrap_or(0) as f64
            + (output_tokens as f64) * card.latency_ms_per_output_token
    }

    /// Estimate the cost of `request` against `table`.
    ///
    /// # Errors
    /// [`crate::EconomistError::UnknownModel`] if the model is not in the table.
    pub fn estimate(&self, table: &RateTable, request: &RequestPayload) -> Result<CostEstimate> {
        let card = table.lookup(request.model_name())?;

        let input_tokens = count_tokens(request.prompt());
        let output_tokens = request
            .estimated_output_tokens()
            .unwrap_or_else(|| self.estimate_output_tokens(input_tokens));

        let agents = request.agent_count() as u64;
        let rounds = request.rounds() as u64;
        let fan_out = agents.saturating_mul(rounds) as f64;

        let unit_financial =
            card.calculate_cost(input_tokens, output_tokens) + self.tools_cost(table, request.tool_calls());
        let financial = unit_financial * fan_out;

        let sequential_units = match self.fan_out {
            FanOutPolicy::Parallel => rounds,
            FanOutPolicy::Sequential => agents.saturating_mul(rounds),
        };
        let latency_ms = (self.round_latency_ms(card, output_tokens) * sequential_units as f64).ceil() as u64;

        let token_volume = input_tokens.saturating_add(output_tokens).saturating_mul(rounds);

        let estimate = CostEstimate::new(financial, latency_ms, token_volume)?;
        tracing::debug!(
            model = request.model_name(),
            input_tokens,
            output_tokens,
            agents,
            rounds,
            financial,
            latency_ms,
            token_volume,
            "Estimated request cost"
        );
        Ok(estimate)
    }
}

impl Default for Pricer {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_name(call: &serde_json::Value) -> Option<&str> {
    call.get("name")
        .and_then(|n| n.as_str())
        .or_else(|| {
            call.get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ToolRate;
    use crate::error::EconomistError;
    use serde_json::json;

    fn table() -> RateTable {
        RateTable::new(
            vec![
                (
                    "gpt-4".into(),
                    RateCard::new(30.0, 60.0).with_latency(None, 10.0),
                ),
                (
                    "gpt-3.5".into(),
                    RateCard::new(0.5, 1.5).with_latency(Some(100), 5.0),
                ),
            ],
            vec![
                ("search".into(), ToolRate { cost_per_call: 0.01 }),
                ("calc".into(), ToolRate { cost_per_call: 0.0 }),
            ],
        )
        .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abc"), 0);
        assert_eq!(count_tokens(&"a".repeat(4000)), 1000);
        // Multi-byte characters count once each
        assert_eq!(count_tokens("éééé"), 1);
    }

    #[test]
    fn test_estimate_with_output_hint() {
        let pricer = Pricer::new();
        let request = RequestPayload::new("gpt-4", "a".repeat(4000))
            .unwrap()
            .with_output_tokens(500);

        let estimate = pricer.estimate(&table(), &request).unwrap();

        // 1000 * 30/1M + 500 * 60/1M
        assert!(approx(estimate.financial(), 0.06));
        assert_eq!(estimate.latency_ms(), 5000);
        assert_eq!(estimate.token_volume(), 1500);
    }

    #[test]
    fn test_output_heuristic() {
        let pricer = Pricer::new();
        assert_eq!(pricer.estimate_output_tokens(100), 20);
        assert_eq!(pricer.estimate_output_tokens(1), 1);
        assert_eq!(pricer.estimate_output_tokens(0), 0);

        let custom = Pricer::new().with_output_ratio(0.5).unwrap();
        assert_eq!(custom.estimate_output_tokens(100), 50);
        assert!(Pricer::new().with_output_ratio(-0.1).is_err());
    }

    #[test]
    fn test_empty_prompt_is_free() {
        let request = RequestPayload::new("gpt-4", "").unwrap();
        let estimate = Pricer::new().estimate(&table(), &request).unwrap();
        assert_eq!(estimate.financial(), 0.0);
        assert_eq!(estimate.latency_ms(), 0);
        assert_eq!(estimate.token_volume(), 0);
    }

    #[test]
    fn test_baseline_latency_added() {
        let request = RequestPayload::new("gpt-3.5", "hello")
            .unwrap()
            .with_output_tokens(10);
        let estimate = Pricer::new().estimate(&table(), &request).unwrap();
        assert_eq!(estimate.latency_ms(), 150);
    }

    #[test]
    fn test_fan_out_scales_financial_not_latency_by_agents() {
        let pricer = Pricer::new();
        let single = RequestPayload::new("gpt-4", "a".repeat(4000))
            .unwrap()
            .with_output_tokens(500);
        let debate = single.clone().with_fan_out(3, 2).unwrap();

        let one = pricer.estimate(&table(), &single).unwrap();
        let many = pricer.estimate(&table(), &debate).unwrap();

        assert!(approx(many.financial(), one.financial() * 6.0));
        assert_eq!(many.latency_ms(), one.latency_ms() * 2);
        assert_eq!(many.token_volume(), one.token_volume() * 2);
    }

    #[test]
    fn test_sequential_policy_scales_latency_by_agents() {
        let pricer = Pricer::new().with_fan_out(FanOutPolicy::Sequential);
        let debate = RequestPayload::new("gpt-4", "a".repeat(4000))
            .unwrap()
            .with_output_tokens(500)
            .with_fan_out(3, 2)
            .unwrap();
        let estimate = pricer.estimate(&table(), &debate).unwrap();
        assert_eq!(estimate.latency_ms(), 5000 * 6);
    }

    #[test]
    fn test_huge_output_hint_saturates() {
        let request = RequestPayload::new("gpt-4", "abcdefgh")
            .unwrap()
            .with_output_tokens(u64::MAX)
            .with_fan_out(u32::MAX, u32::MAX)
            .unwrap();
        let estimate = Pricer::new()
            .with_fan_out(FanOutPolicy::Sequential)
            .estimate(&table(), &request)
            .unwrap();
        assert_eq!(estimate.token_volume(), u64::MAX);
        assert_eq!(estimate.latency_ms(), u64::MAX);
        assert!(estimate.financial().is_finite());
    }

    #[test]
    fn test_tools_cost() {
        let pricer = Pricer::new();
        let calls = vec![
            json!({"name": "search"}),
            json!({"function": {"name": "search"}}),
            json!({"name": "calc"}),
            json!({"name": "unknown"}),
            json!({"arguments": "{}"}),
        ];
        assert!(approx(pricer.tools_cost(&table(), &calls), 0.02));
        assert_eq!(pricer.tools_cost(&table(), &[]), 0.0);
    }

    #[test]
    fn test_tools_cost_scales_with_fan_out() {
        let request = RequestPayload::new("gpt-4", "")
            .unwrap()
            .with_tool_calls(vec![json!({"name": "search"})])
            .with_fan_out(2, 3)
            .unwrap();
        let estimate = Pricer::new().estimate(&table(), &request).unwrap();
        assert!(approx(estimate.financial(), 0.06));
    }

    #[test]
    fn test_unknown_model() {
        let request = RequestPayload::new("mystery", "hello").unwrap();
        let err = Pricer::new().estimate(&table(), &request).unwrap_err();
        assert!(matches!(err, EconomistError::UnknownModel(m) if m == "mystery"));
    }

    #[test]
    fn test_fan_out_policy_parse() {
        assert_eq!("parallel".parse::<FanOutPolicy>(), Ok(FanOutPolicy::Parallel));
        assert_eq!(" Sequential ".parse::<FanOutPolicy>(), Ok(FanOutPolicy::Sequential));
        assert!("both".parse::<FanOutPolicy>().is_err());
    }
}
