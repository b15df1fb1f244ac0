//! Rate cards and the shared rate catalog.
//!
//! The catalog is process-wide configuration: loaded at startup, read by
//! every decision, and replaced wholesale when prices change. Readers take
//! a [`RateTable`] snapshot and price an entire request against it, so an
//! update never leaves a request half-priced at old rates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{EconomistError, ValidationError};

/// Pricing and latency characteristics of a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    /// Cost per 1M input tokens in dollars
    pub input_cost_per_million: f64,

    /// Cost per 1M output tokens in dollars
    pub output_cost_per_million: f64,

    /// Flat per-call latency before the first output token
    #[serde(default)]
    pub baseline_latency_ms: Option<u64>,

    /// Generation speed, in milliseconds per output token
    #[serde(default)]
    pub latency_ms_per_output_token: f64,

    /// Capability tier; higher is more capable. Supplied by the catalog.
    #[serde(default)]
    pub capability_tier: u8,
}

impl RateCard {
    pub fn new(input_cost_per_million: f64, output_cost_per_million: f64) -> Self {
        Self {
            input_cost_per_million,
            output_cost_per_million,
            baseline_latency_ms: None,
            latency_ms_per_output_token: 0.0,
            capability_tier: 0,
        }
    }

    pub fn with_latency(mut self, baseline_ms: Option<u64>, ms_per_output_token: f64) -> Self {
        self.baseline_latency_ms = baseline_ms;
        self.latency_ms_per_output_token = ms_per_output_token;
        self
    }

    pub fn with_capability_tier(mut self, tier: u8) -> Self {
        self.capability_tier = tier;
        self
    }

    /// Dollar cost of one call for the given token counts.
    ///
    /// # Formula
    /// `cost = (input_tokens * input_rate + output_tokens * output_rate) / 1_000_000`
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64) * self.input_cost_per_million / 1_000_000.0;
        let output_cost = (output_tokens as f64) * self.output_cost_per_million / 1_000_000.0;
        input_cost + output_cost
    }

    /// Input plus output price per 1M tokens, used to rank models by cost.
    pub fn blended_cost_per_million(&self) -> f64 {
        self.input_cost_per_million + self.output_cost_per_million
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_amount("input_cost_per_million", self.input_cost_per_million)?;
        ValidationError::check_amount("output_cost_per_million", self.output_cost_per_million)?;
        ValidationError::check_amount("latency_ms_per_output_token", self.latency_ms_per_output_token)?;
        Ok(())
    }
}

/// Flat per-call price of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolRate {
    pub cost_per_call: f64,
}

/// An immutable, validated table of model and tool rates.
///
/// Models keep their declaration order, which doubles as preference order
/// when two candidates cost exactly the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RateTableSpec", try_from = "RateTableSpec")]
pub struct RateTable {
    models: Vec<(String, RateCard)>,
    index: HashMap<String, usize>,
    tools: HashMap<String, ToolRate>,
}

impl RateTable {
    /// Build a table from ordered model entries and tool rates.
    ///
    /// # Errors
    /// Empty or duplicate ids, and negative or non-finite prices.
    pub fn new(
        models: Vec<(String, RateCard)>,
        tools: Vec<(String, ToolRate)>,
    ) -> Result<Self, ValidationError> {
        let mut index = HashMap::with_capacity(models.len());
        for (position, (id, card)) in models.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(ValidationError::EmptyModelName);
            }
            card.validate()?;
            if index.insert(id.clone(), position).is_some() {
                return Err(ValidationError::DuplicateModel(id.clone()));
            }
        }

        let mut tool_map = HashMap::with_capacity(tools.len());
        for (name, rate) in tools {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyToolName);
            }
            ValidationError::check_amount("cost_per_call", rate.cost_per_call)?;
            if tool_map.insert(name.clone(), rate).is_some() {
                return Err(ValidationError::DuplicateTool(name));
            }
        }

        Ok(Self {
            models,
            index,
            tools: tool_map,
        })
    }

    /// Look up the rate card of a model.
    pub fn get(&self, model_id: &str) -> Option<&RateCard> {
        self.index.get(model_id).map(|&i| &self.models[i].1)
    }

    /// Resolve a model or fail with [`EconomistError::UnknownModel`].
    pub fn lookup(&self, model_id: &str) -> Result<&RateCard, EconomistError> {
        self.get(model_id)
            .ok_or_else(|| EconomistError::UnknownModel(model_id.to_string()))
    }

    /// Look up the per-call rate of a tool.
    pub fn tool(&self, name: &str) -> Option<&ToolRate> {
        self.tools.get(name)
    }

    /// Models in catalog (preference) order.
    pub fn models(&self) -> impl Iterator<Item = (usize, &str, &RateCard)> {
        self.models
            .iter()
            .enumerate()
            .map(|(i, (id, card))| (i, id.as_str(), card))
    }

    /// Models sorted by blended cost (cheapest first), catalog order on ties.
    pub fn models_by_cost(&self) -> Vec<(&str, &RateCard)> {
        let mut models: Vec<_> = self.models.iter().map(|(id, card)| (id.as_str(), card)).collect();
        // sort_by is stable, so equal prices keep catalog order
        models.sort_by(|a, b| {
            a.1.blended_cost_per_million()
                .partial_cmp(&b.1.blended_cost_per_million())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for RateTable {
    /// Built-in rates for common models. Prices in $ per 1M tokens.
    fn default() -> Self {
        let defaults = [
            // (id, input, output, baseline ms, ms per output token, tier)
            ("gpt-4o", 5.00, 15.00, 300, 20.0, 3),
            ("claude-3-5-sonnet", 3.00, 15.00, 400, 25.0, 3),
            ("llama-3.1-70b", 0.88, 0.88, 250, 10.0, 2),
            ("gpt-4o-mini", 0.15, 0.60, 200, 10.0, 1),
        ];

        let models: Vec<(String, RateCard)> = defaults
            .into_iter()
            .map(|(id, input, output, baseline, per_token, tier)| {
                (
                    id.to_string(),
                    RateCard::new(input, output)
                        .with_latency(Some(baseline), per_token)
                        .with_capability_tier(tier),
                )
            })
            .collect();
        let index = models
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();
        let tools = HashMap::from([("web_search".to_string(), ToolRate { cost_per_call: 0.01 })]);

        Self { models, index, tools }
    }
}

/// On-disk / wire form of a rate table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTableSpec {
    pub models: Vec<ModelRateSpec>,
    #[serde(default)]
    pub tools: Vec<ToolRateSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRateSpec {
    pub id: String,
    #[serde(flatten)]
    pub card: RateCard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRateSpec {
    pub id: String,
    pub cost_per_call: f64,
}

impl TryFrom<RateTableSpec> for RateTable {
    type Error = ValidationError;

    fn try_from(spec: RateTableSpec) -> Result<Self, Self::Error> {
        RateTable::new(
            spec.models.into_iter().map(|m| (m.id, m.card)).collect(),
            spec.tools
                .into_iter()
                .map(|t| (t.id, ToolRate { cost_per_call: t.cost_per_call }))
                .collect(),
        )
    }
}

impl From<RateTable> for RateTableSpec {
    fn from(table: RateTable) -> Self {
        let mut tools: Vec<ToolRateSpec> = table
            .tools
            .into_iter()
            .map(|(id, rate)| ToolRateSpec {
                id,
                cost_per_call: rate.cost_per_call,
            })
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            models: table
                .models
                .into_iter()
                .map(|(id, card)| ModelRateSpec { id, card })
                .collect(),
            tools,
        }
    }
}

/// Shared handle to the current rate table.
///
/// Cloning the handle shares the table. Updates replace the whole table
/// atomically; in-flight readers keep the snapshot they started with.
#[derive(Debug, Clone)]
pub struct RateCatalog {
    table: Arc<RwLock<Arc<RateTable>>>,
}

impl RateCatalog {
    pub fn new(table: RateTable) -> Self {
        Self {
            table: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// The current table. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<RateTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new table, returning the one it replaced.
    pub fn replace(&self, table: RateTable) -> Arc<RateTable> {
        let next = Arc::new(table);
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *guard, next);
        tracing::info!(
            previous_models = previous.len(),
            models = guard.len(),
            "Rate table replaced"
        );
        previous
    }

    /// Resolve a model against the current table.
    pub fn lookup(&self, model_id: &str) -> Result<RateCard, EconomistError> {
        self.snapshot().lookup(model_id).cloned()
    }
}

impl Default for RateCatalog {
    fn default() -> Self {
        Self::new(RateTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(input: f64, output: f64) -> RateCard {
        RateCard::new(input, output)
    }

    #[test]
    fn test_calculate_cost() {
        let gpt4o = card(5.0, 15.0);
        // 1000 input at $5/M + 500 output at $15/M
        let cost = gpt4o.calculate_cost(1000, 500);
        assert!((cost - 0.0125).abs() < 1e-12);
        assert_eq!(gpt4o.blended_cost_per_million(), 20.0);
    }

    #[test]
    fn test_default_table_contains_required_models() {
        let table = RateTable::default();
        for id in ["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet", "llama-3.1-70b"] {
            assert!(table.get(id).is_some(), "missing {}", id);
        }
        let llama = table.get("llama-3.1-70b").unwrap();
        assert_eq!(llama.input_cost_per_million, 0.88);
        assert_eq!(llama.latency_ms_per_output_token, 10.0);
        assert_eq!(table.tool("web_search").unwrap().cost_per_call, 0.01);
    }

    #[test]
    fn test_lookup_unknown_model() {
        let table = RateTable::default();
        assert!(matches!(
            table.lookup("gpt-9"),
            Err(EconomistError::UnknownModel(m)) if m == "gpt-9"
        ));
    }

    #[test]
    fn test_table_rejects_invalid_entries() {
        let dup = RateTable::new(
            vec![("a".into(), card(1.0, 1.0)), ("a".into(), card(2.0, 2.0))],
            vec![],
        );
        assert_eq!(dup, Err(ValidationError::DuplicateModel("a".into())));

        let negative = RateTable::new(vec![("a".into(), card(-1.0, 1.0))], vec![]);
        assert!(matches!(negative, Err(ValidationError::Negative { .. })));

        let empty = RateTable::new(vec![("".into(), card(1.0, 1.0))], vec![]);
        assert_eq!(empty, Err(ValidationError::EmptyModelName));
    }

    #[test]
    fn test_models_by_cost_keeps_catalog_order_on_ties() {
        let table = RateTable::new(
            vec![
                ("expensive".into(), card(10.0, 10.0)),
                ("twin-b".into(), card(1.0, 1.0)),
                ("twin-a".into(), card(1.0, 1.0)),
            ],
            vec![],
        )
        .unwrap();
        let order: Vec<&str> = table.models_by_cost().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["twin-b", "twin-a", "expensive"]);
    }

    #[test]
    fn test_yaml_json_round_trip_preserves_order() {
        let yaml = r#"
models:
  - id: big
    input_cost_per_million: 10.0
    output_cost_per_million: 30.0
    capability_tier: 3
  - id: small
    input_cost_per_million: 0.1
    output_cost_per_million: 0.4
    baseline_latency_ms: 150
    latency_ms_per_output_token: 5.0
tools:
  - id: search
    cost_per_call: 0.02
"#;
        let table: RateTable = serde_yaml::from_str(yaml).unwrap();
        let ids: Vec<&str> = table.models().map(|(_, id, _)| id).collect();
        assert_eq!(ids, vec!["big", "small"]);
        assert_eq!(table.get("small").unwrap().baseline_latency_ms, Some(150));
        assert_eq!(table.get("big").unwrap().capability_tier, 3);

        let json = serde_json::to_string(&table).unwrap();
        let back: RateTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_catalog_replace_is_atomic_for_snapshots() {
        let catalog = RateCatalog::default();
        let before = catalog.snapshot();
        let replacement = RateTable::new(vec![("only".into(), card(1.0, 1.0))], vec![]).unwrap();

        let previous = catalog.replace(replacement);

        // A reader holding the old snapshot still sees the complete old table.
        assert!(before.get("gpt-4o").is_some());
        assert!(before.get("only").is_none());
        assert!(Arc::ptr_eq(&before, &previous));

        let after = catalog.snapshot();
        assert!(after.get("gpt-4o").is_none());
        assert!(after.get("only").is_some());
        assert!(catalog.lookup("gpt-4o").is_err());
    }

    #[test]
    fn test_catalog_concurrent_readers() {
        let catalog = RateCatalog::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i == 0 {
                            catalog.replace(RateTable::default());
                        }
                        let table = catalog.snapshot();
                        assert_eq!(table.len(), 4);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
