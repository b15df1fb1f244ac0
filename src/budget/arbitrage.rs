//! Cheaper substitutes for rejected or over-provisioned requests.
//!
//! # Search order
//! 1. Model substitution at the requested topology
//! 2. Fewer agents or rounds on the requested model, keeping agents first
//! 3. Cheaper model at a single agent and single round
//!
//! Every candidate is re-priced and re-authorized under the caller's
//! budget, so a returned alternative is always one the authority approves.

use serde::{Deserialize, Serialize};

use super::authority::BudgetAuthority;
use super::budget::{Budget, CostEstimate};
use super::pricer::Pricer;
use super::pricing::{RateCard, RateTable};
use crate::error::ValidationError;
use crate::request::RequestPayload;

/// How an alternative differs from the original request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionStrategy {
    ModelSubstitution,
    TopologyReduction,
    ModelAndTopology,
    Downgrade,
}

/// A recommended substitute request. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub request: RequestPayload,
    pub estimated_cost: CostEstimate,
    pub strategy: SubstitutionStrategy,
    pub note: String,
}

/// Searches the rate table for approved, cheaper variants of a request.
#[derive(Debug, Clone)]
pub struct Arbitrageur {
    pricer: Pricer,
    authority: BudgetAuthority,
    min_capability_tier: Option<u8>,
    difficulty_threshold: f64,
}

impl Arbitrageur {
    /// Requests easier than this are candidates for a downgrade.
    pub const DEFAULT_DIFFICULTY_THRESHOLD: f64 = 0.5;

    pub fn new(pricer: Pricer, authority: BudgetAuthority) -> Self {
        Self {
            pricer,
            authority,
            min_capability_tier: None,
            difficulty_threshold: Self::DEFAULT_DIFFICULTY_THRESHOLD,
        }
    }

    /// Capability floor used when the request does not carry its own.
    pub fn with_min_capability_tier(mut self, tier: Option<u8>) -> Self {
        self.min_capability_tier = tier;
        self
    }

    pub fn with_difficulty_threshold(mut self, threshold: f64) -> Result<Self, ValidationError> {
        self.difficulty_threshold = ValidationError::check_unit("difficulty_threshold", threshold)?;
        Ok(self)
    }

    /// Replace the pricer and authority used to appraise candidates.
    pub fn with_components(mut self, pricer: Pricer, authority: BudgetAuthority) -> Self {
        self.pricer = pricer;
        self.authority = authority;
        self
    }

    pub fn difficulty_threshold(&self) -> f64 {
        self.difficulty_threshold
    }

    fn floor(&self, request: &RequestPayload) -> u8 {
        request
            .min_capability_tier()
            .or(self.min_capability_tier)
            .unwrap_or(0)
    }

    /// Price `candidate` and return its estimate if `budget` admits it.
    fn appraise(&self, table: &RateTable, candidate: &RequestPayload, budget: &Budget) -> Option<CostEstimate> {
        let estimate = self.pricer.estimate(table, candidate).ok()?;
        self.authority
            .authorize(&estimate, budget)
            .is_approved()
            .then_some(estimate)
    }

    /// Cheapest approved candidate. Earlier candidates win exact ties.
    fn cheapest(
        &self,
        table: &RateTable,
        candidates: impl Iterator<Item = RequestPayload>,
        budget: &Budget,
    ) -> Option<(RequestPayload, CostEstimate)> {
        let mut best: Option<(RequestPayload, CostEstimate)> = None;
        for candidate in candidates {
            let Some(estimate) = self.appraise(table, &candidate, budget) else {
                continue;
            };
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| estimate.financial() < current.financial());
            if better {
                best = Some((candidate, estimate));
            }
        }
        best
    }

    /// Catalog models cheaper than `original` that meet `floor`, in catalog order.
    fn cheaper_models<'a>(
        table: &'a RateTable,
        original: &'a RateCard,
        floor: u8,
    ) -> impl Iterator<Item = &'a str> + 'a {
        table.models().filter_map(move |(_, id, card)| {
            (card.blended_cost_per_million() < original.blended_cost_per_million()
                && card.capability_tier >= floor)
                .then_some(id)
        })
    }

    /// Find an approved alternative to a rejected `request` under `budget`.
    ///
    /// Returns `None` when no model or topology in the table fits.
    pub fn suggest(&self, table: &RateTable, request: &RequestPayload, budget: &Budget) -> Option<Alternative> {
        let original = table.get(request.model_name())?;
        let floor = self.floor(request);

        let substitutes = Self::cheaper_models(table, original, floor)
            .filter_map(|id| request.with_model(id).ok());
        if let Some((candidate, estimate)) = self.cheapest(table, substitutes, budget) {
            let note = format!(
                "Switch from {} to {} (estimated ${:.6})",
                request.model_name(),
                candidate.model_name(),
                estimate.financial()
            );
            return Some(self.found(request, candidate, estimate, SubstitutionStrategy::ModelSubstitution, note));
        }

        if let Some((candidate, estimate)) = self.reduce_topology(table, request, budget) {
            let note = format!(
                "Reduce {} to {} agent(s) x {} round(s) (estimated ${:.6})",
                request.model_name(),
                candidate.agent_count(),
                candidate.rounds(),
                estimate.financial()
            );
            return Some(self.found(request, candidate, estimate, SubstitutionStrategy::TopologyReduction, note));
        }

        if request.agent_count() == 1 && request.rounds() == 1 {
            return None;
        }
        let single = Self::cheaper_models(table, original, floor).filter_map(|id| {
            request
                .with_model(id)
                .and_then(|r| r.with_fan_out(1, 1))
                .ok()
        });
        let (candidate, estimate) = self.cheapest(table, single, budget)?;
        let note = format!(
            "Switch from {} to {} with a single agent and round (estimated ${:.6})",
            request.model_name(),
            candidate.model_name(),
            estimate.financial()
        );
        Some(self.found(request, candidate, estimate, SubstitutionStrategy::ModelAndTopology, note))
    }

    /// Largest approved topology below the requested one on the same model.
    ///
    /// Keeps as many agents as possible, then as many rounds as possible.
    /// Every estimate dimension is non-decreasing in both agents and rounds,
    /// so each axis is binary searched.
    fn reduce_topology(
        &self,
        table: &RateTable,
        request: &RequestPayload,
        budget: &Budget,
    ) -> Option<(RequestPayload, CostEstimate)> {
        let (agents, rounds) = (request.agent_count(), request.rounds());
        let fits = |a: u32, r: u32| {
            let candidate = request.clone().with_fan_out(a, r).ok()?;
            let estimate = self.appraise(table, &candidate, budget)?;
            Some((candidate, estimate))
        };

        if rounds > 1 && fits(agents, 1).is_some() {
            return largest_fitting(rounds - 1, |r| fits(agents, r));
        }
        let (kept, _) = largest_fitting(agents - 1, |a| fits(a, 1))?;
        largest_fitting(rounds, |r| fits(kept.agent_count(), r))
    }

    /// Propose a cheaper single-shot model for a request marked as easy.
    ///
    /// Only requests whose `difficulty_score` is below the difficulty
    /// threshold qualify. The alternative must be approved and strictly
    /// cheaper than the original estimate.
    pub fn suggest_downgrade(
        &self,
        table: &RateTable,
        request: &RequestPayload,
        budget: &Budget,
    ) -> Option<Alternative> {
        let difficulty = request.difficulty_score()?;
        if difficulty >= self.difficulty_threshold {
            return None;
        }
        let original = self.pricer.estimate(table, request).ok()?;
        let floor = self.floor(request);

        let candidates = table
            .models()
            .filter(|(_, _, card)| card.capability_tier >= floor)
            .filter_map(|(_, id, _)| {
                request
                    .with_model(id)
                    .and_then(|r| r.with_fan_out(1, 1))
                    .ok()
            });
        let (candidate, estimate) = self.cheapest(table, candidates, budget)?;
        if estimate.financial() >= original.financial() {
            return None;
        }

        let note = format!(
            "Task difficulty {:.2} is below {:.2}: {} at 1 agent x 1 round is estimated ${:.6} instead of ${:.6}",
            difficulty,
            self.difficulty_threshold,
            candidate.model_name(),
            estimate.financial(),
            original.financial()
        );
        Some(self.found(request, candidate, estimate, SubstitutionStrategy::Downgrade, note))
    }

    fn found(
        &self,
        original: &RequestPayload,
        request: RequestPayload,
        estimated_cost: CostEstimate,
        strategy: SubstitutionStrategy,
        note: String,
    ) -> Alternative {
        tracing::info!(
            from = original.model_name(),
            to = request.model_name(),
            agents = request.agent_count(),
            rounds = request.rounds(),
            financial = estimated_cost.financial(),
            ?strategy,
            "Found cheaper alternative"
        );
        Alternative {
            request,
            estimated_cost,
            strategy,
            note,
        }
    }
}

/// Largest `n` in `1..=max` for which `fits` succeeds, assuming that once
/// `fits(n)` fails it fails for every larger `n` too.
fn largest_fitting<T>(max: u32, mut fits: impl FnMut(u32) -> Option<T>) -> Option<T> {
    if max == 0 {
        return None;
    }
    let mut best = fits(1)?;
    let (mut lo, mut hi) = (2u64, u64::from(max));
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        match fits(mid as u32) {
            Some(found) => {
                best = found;
                lo = mid + 1;
            }
            None => hi = mid - 1,
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RateTable {
        RateTable::new(
            vec![
                (
                    "premium".into(),
                    RateCard::new(10.0, 30.0)
                        .with_latency(None, 20.0)
                        .with_capability_tier(3),
                ),
                (
                    "standard".into(),
                    RateCard::new(3.0, 15.0)
                        .with_latency(None, 15.0)
                        .with_capability_tier(2),
                ),
                (
                    "budget".into(),
                    RateCard::new(0.5, 1.5)
                        .with_latency(None, 5.0)
                        .with_capability_tier(1),
                ),
            ],
            vec![],
        )
        .unwrap()
    }

    fn arbitrageur() -> Arbitrageur {
        Arbitrageur::new(Pricer::new(), BudgetAuthority::new())
    }

    /// 1000 input tokens, 1000 output tokens.
    /// premium $0.04, standard $0.018, budget $0.002 per agent-round.
    fn request(model: &str) -> RequestPayload {
        RequestPayload::new(model, "a".repeat(4000))
            .unwrap()
            .with_output_tokens(1000)
    }

    fn financial(limit: f64) -> Budget {
        Budget::unconstrained().with_financial(limit).unwrap()
    }

    #[test]
    fn test_substitutes_cheapest_approved_model() {
        let alt = arbitrageur()
            .suggest(&table(), &request("premium"), &financial(0.02))
            .unwrap();
        assert_eq!(alt.strategy, SubstitutionStrategy::ModelSubstitution);
        assert_eq!(alt.request.model_name(), "budget");
        assert!((alt.estimated_cost.financial() - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_respects_capability_floor() {
        let req = request("premium").with_min_capability_tier(2);
        let alt = arbitrageur().suggest(&table(), &req, &financial(0.02)).unwrap();
        assert_eq!(alt.request.model_name(), "standard");

        let configured = arbitrageur().with_min_capability_tier(Some(2));
        let alt = configured.suggest(&table(), &request("premium"), &financial(0.02)).unwrap();
        assert_eq!(alt.request.model_name(), "standard");
    }

    #[test]
    fn test_topology_reduction_reduces_rounds_first() {
        let req = request("premium")
            .with_fan_out(2, 2)
            .unwrap()
            .with_min_capability_tier(3);
        // 2x2 costs $0.16; 2 agents x 1 round costs $0.08
        let alt = arbitrageur().suggest(&table(), &req, &financial(0.09)).unwrap();
        assert_eq!(alt.strategy, SubstitutionStrategy::TopologyReduction);
        assert_eq!(alt.request.model_name(), "premium");
        assert_eq!((alt.request.agent_count(), alt.request.rounds()), (2, 1));
    }

    #[test]
    fn test_topology_reduction_keeps_agents_before_rounds() {
        let req = request("premium").with_min_capability_tier(3);

        // $0.04 per agent-round: 2 agents x 3 rounds is $0.24
        let wide = req.clone().with_fan_out(2, 4).unwrap();
        let alt = arbitrageur().suggest(&table(), &wide, &financial(0.25)).unwrap();
        assert_eq!(alt.strategy, SubstitutionStrategy::TopologyReduction);
        assert_eq!((alt.request.agent_count(), alt.request.rounds()), (2, 3));

        // 4 agents fit no round at $0.15, 3 agents fit one
        let crowded = req.with_fan_out(4, 3).unwrap();
        let alt = arbitrageur().suggest(&table(), &crowded, &financial(0.15)).unwrap();
        assert_eq!((alt.request.agent_count(), alt.request.rounds()), (3, 1));
    }

    #[test]
    fn test_topology_reduction_scales_to_large_fan_out() {
        let req = request("premium")
            .with_fan_out(u32::MAX, u32::MAX)
            .unwrap()
            .with_min_capability_tier(3);

        // 25 agent-rounds at $0.04 fit in $1.02
        let alt = arbitrageur().suggest(&table(), &req, &financial(1.02)).unwrap();
        assert_eq!((alt.request.agent_count(), alt.request.rounds()), (25, 1));

        assert!(arbitrageur().suggest(&table(), &req, &financial(0.0)).is_none());
    }

    #[test]
    fn test_largest_fitting() {
        assert_eq!(largest_fitting(10, |n| (n <= 7).then_some(n)), Some(7));
        assert_eq!(largest_fitting(10, |n| (n <= 20).then_some(n)), Some(10));
        assert_eq!(largest_fitting(10, |_| None::<u32>), None);
        assert_eq!(largest_fitting(0, Some), None);
        assert_eq!(largest_fitting(u32::MAX, Some), Some(u32::MAX));
    }

    #[test]
    fn test_model_and_topology_fallback() {
        let req = request("premium")
            .with_fan_out(2, 2)
            .unwrap()
            .with_min_capability_tier(2);
        // standard at 2x2 is $0.072, premium at 1x1 is $0.04; standard at 1x1 is $0.018
        let alt = arbitrageur().suggest(&table(), &req, &financial(0.03)).unwrap();
        assert_eq!(alt.strategy, SubstitutionStrategy::ModelAndTopology);
        assert_eq!(alt.request.model_name(), "standard");
        assert_eq!((alt.request.agent_count(), alt.request.rounds()), (1, 1));
    }

    #[test]
    fn test_no_alternative_when_nothing_fits() {
        let result = arbitrageur().suggest(&table(), &request("premium"), &financial(0.0001));
        assert!(result.is_none());

        let cheapest = arbitrageur().suggest(&table(), &request("budget"), &financial(0.0001));
        assert!(cheapest.is_none());
    }

    #[test]
    fn test_latency_driven_substitution() {
        // premium 20000ms, standard 15000ms, budget 5000ms
        let budget = Budget::unconstrained().with_latency_ms(10_000);
        let alt = arbitrageur().suggest(&table(), &request("premium"), &budget).unwrap();
        assert_eq!(alt.request.model_name(), "budget");
    }

    #[test]
    fn test_alternative_round_trips_through_authority() {
        let authority = BudgetAuthority::new();
        let pricer = Pricer::new();
        let budget = Budget::new(Some(0.03), Some(18_000), None).unwrap();
        let req = request("premium").with_fan_out(3, 2).unwrap();

        let alt = arbitrageur().suggest(&table(), &req, &budget).unwrap();
        let estimate = pricer.estimate(&table(), &alt.request).unwrap();

        assert_eq!(estimate, alt.estimated_cost);
        assert!(authority.authorize(&estimate, &budget).is_approved());
    }

    #[test]
    fn test_ties_break_on_catalog_order() {
        let table = RateTable::new(
            vec![
                ("big".into(), RateCard::new(10.0, 10.0)),
                ("twin-b".into(), RateCard::new(1.0, 1.0)),
                ("twin-a".into(), RateCard::new(1.0, 1.0)),
            ],
            vec![],
        )
        .unwrap();
        let alt = arbitrageur().suggest(&table, &request("big"), &financial(0.005)).unwrap();
        assert_eq!(alt.request.model_name(), "twin-b");
    }

    #[test]
    fn test_downgrade_for_easy_task() {
        let req = request("premium").with_difficulty(0.3).unwrap();
        let alt = arbitrageur()
            .suggest_downgrade(&table(), &req, &Budget::unconstrained())
            .unwrap();
        assert_eq!(alt.strategy, SubstitutionStrategy::Downgrade);
        assert_eq!(alt.request.model_name(), "budget");
        assert!(alt.note.contains("0.30"));
    }

    #[test]
    fn test_no_downgrade_for_hard_or_unscored_task() {
        let hard = request("premium").with_difficulty(0.7).unwrap();
        assert!(arbitrageur()
            .suggest_downgrade(&table(), &hard, &Budget::unconstrained())
            .is_none());
        assert!(arbitrageur()
            .suggest_downgrade(&table(), &request("premium"), &Budget::unconstrained())
            .is_none());
    }

    #[test]
    fn test_no_downgrade_when_already_cheapest() {
        let req = request("budget").with_difficulty(0.1).unwrap();
        assert!(arbitrageur()
            .suggest_downgrade(&table(), &req, &Budget::unconstrained())
            .is_none());
    }
}
