//! The economist facade.
//!
//! Composes the pricer, budget authority, arbitrageur, VOC engine and
//! calibrator behind three calls:
//!
//! - [`Economist::check_execution`]: price and authorize a request, yielding a trace
//! - [`Economist::should_continue`]: decide whether another reasoning step pays off
//! - [`Economist::reconcile`]: record what a request actually cost
//!
//! Decision calls are synchronous and side-effect free apart from logging.
//! Each one prices against a single rate table snapshot.

use crate::budget::{
    count_tokens, observed_output_ratio, Arbitrageur, BudgetAuthority, BudgetVariance, CalibrationResult,
    CalibrationStats, Calibrator, CostEstimate, Pricer, RateCatalog,
};
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::request::RequestPayload;
use crate::trace::{Decision, EconomicTrace};
use crate::voc::{ReasoningTrace, SimilarityMeasure, VocEngine, VocOptions, VocResult};

/// Admission control and stopping authority for agentic workloads.
#[derive(Debug)]
pub struct Economist {
    catalog: RateCatalog,
    pricer: Pricer,
    authority: BudgetAuthority,
    arbitrageur: Arbitrageur,
    voc: VocEngine,
    calibrator: Calibrator,
}

impl Economist {
    /// An economist with default settings over `catalog`.
    pub fn new(catalog: RateCatalog) -> Self {
        EconomistBuilder::new(catalog).build()
    }

    pub fn builder(catalog: RateCatalog) -> EconomistBuilder {
        EconomistBuilder::new(catalog)
    }

    /// Build an economist from loaded configuration.
    pub fn from_config(config: &Config, catalog: RateCatalog) -> std::result::Result<Self, ValidationError> {
        let economist = EconomistBuilder::new(catalog)
            .pricer(
                Pricer::new()
                    .with_output_ratio(config.output_token_ratio)?
                    .with_fan_out(config.fan_out),
            )
            .authority(BudgetAuthority::new().with_soft_limit_threshold(config.soft_limit_threshold)?)
            .voc(VocEngine::new().with_threshold(config.voc_stop_threshold)?)
            .min_capability_tier(config.min_capability_tier)
            .difficulty_threshold(config.arbitrage_difficulty_threshold)?
            .calibration_min_samples(config.calibration_min_samples)
            .build();
        Ok(economist)
    }

    pub fn catalog(&self) -> &RateCatalog {
        &self.catalog
    }

    pub fn pricer(&self) -> &Pricer {
        &self.pricer
    }

    /// Price and authorize `request` before it runs.
    ///
    /// A rejected request is not an error: the returned trace says
    /// `Rejected` and may carry a cheaper alternative. An approved request
    /// marked as easy may come back `Modified` with a downgrade suggestion;
    /// the original request still fits its budget.
    ///
    /// # Errors
    /// [`crate::EconomistError::UnknownModel`] when the model is not in the
    /// catalog. No trace is produced in that case.
    pub fn check_execution(&self, request: &RequestPayload) -> Result<EconomicTrace> {
        let table = self.catalog.snapshot();
        let estimate = self.pricer.estimate(&table, request)?;
        let budget = request.max_budget();
        let authorization =
            self.authority
                .authorize_with_threshold(&estimate, budget, request.soft_limit_threshold());
        let input_tokens = count_tokens(request.prompt());

        let trace = if authorization.is_approved() {
            let warning = authorization.warning_message();
            match self.arbitrageur.suggest_downgrade(&table, request, budget) {
                Some(alternative) => {
                    let reason = format!(
                        "{} Cheaper alternative available: {}",
                        authorization.reason, alternative.note
                    );
                    EconomicTrace::new(request.model_name(), input_tokens, estimate, Decision::Modified, reason)
                        .with_alternative(Some(alternative))
                }
                None => EconomicTrace::new(
                    request.model_name(),
                    input_tokens,
                    estimate,
                    Decision::Approved,
                    authorization.reason,
                ),
            }
            .with_warning(warning)
        } else {
            let alternative = self.arbitrageur.suggest(&table, request, budget);
            EconomicTrace::new(
                request.model_name(),
                input_tokens,
                estimate,
                Decision::Rejected,
                authorization.reason,
            )
            .with_alternative(alternative)
        }
        .with_rounds(request.rounds());

        tracing::info!(
            trace_id = %trace.id(),
            model = request.model_name(),
            decision = %trace.decision(),
            financial = estimate.financial(),
            latency_ms = estimate.latency_ms(),
            token_volume = estimate.token_volume(),
            has_alternative = trace.suggested_alternative().is_some(),
            "Execution check: {}",
            trace.reason()
        );
        Ok(trace)
    }

    /// Decide whether the reasoning process should take another step.
    pub fn should_continue(&self, trace: &ReasoningTrace) -> VocResult {
        self.voc.evaluate(trace)
    }

    /// Like [`Self::should_continue`], with a threshold override and budget context.
    pub fn should_continue_with(&self, trace: &ReasoningTrace, options: &VocOptions) -> Result<VocResult> {
        Ok(self.voc.evaluate_with(trace, options)?)
    }

    /// Record the realized cost of a traced request.
    ///
    /// # Errors
    /// [`crate::EconomistError::AlreadyReconciled`] on a second call for the same trace.
    pub fn reconcile(&self, trace: &mut EconomicTrace, actual: CostEstimate) -> Result<CalibrationResult> {
        trace.record_actual(actual)?;

        let variance = BudgetVariance::between(trace.estimated_cost(), &actual);
        let observed = observed_output_ratio(trace.input_tokens(), actual.token_volume(), trace.rounds());
        let (samples, recommended) = self.calibrator.record(observed, self.pricer.output_ratio());

        if variance.overspent() {
            tracing::warn!(
                trace_id = %trace.id(),
                model = trace.model_used(),
                estimated = trace.estimated_cost().financial(),
                actual = actual.financial(),
                "Actual cost exceeded estimate"
            );
        }
        tracing::info!(
            trace_id = %trace.id(),
            observed_output_ratio = observed,
            recommended_output_ratio = recommended,
            samples,
            "Trace reconciled"
        );

        Ok(CalibrationResult {
            trace_id: trace.id(),
            variance,
            observed_output_ratio: observed,
            recommended_output_ratio: recommended,
            samples,
        })
    }

    /// Current calibration statistics.
    pub fn calibration(&self) -> CalibrationStats {
        self.calibrator.snapshot(self.pricer.output_ratio())
    }
}

/// Assembles an [`Economist`] from validated components.
pub struct EconomistBuilder {
    catalog: RateCatalog,
    pricer: Pricer,
    authority: BudgetAuthority,
    arbitrageur: Arbitrageur,
    voc: VocEngine,
    min_samples: u64,
}

impl EconomistBuilder {
    fn new(catalog: RateCatalog) -> Self {
        Self {
            catalog,
            pricer: Pricer::new(),
            authority: BudgetAuthority::new(),
            arbitrageur: Arbitrageur::new(Pricer::new(), BudgetAuthority::new()),
            voc: VocEngine::new(),
            min_samples: Calibrator::DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn pricer(mut self, pricer: Pricer) -> Self {
        self.pricer = pricer;
        self
    }

    pub fn authority(mut self, authority: BudgetAuthority) -> Self {
        self.authority = authority;
        self
    }

    pub fn voc(mut self, voc: VocEngine) -> Self {
        self.voc = voc;
        self
    }

    pub fn similarity_measure(mut self, measure: impl SimilarityMeasure + 'static) -> Self {
        self.voc = self.voc.with_measure(measure);
        self
    }

    /// Capability floor for substitutes when a request sets none.
    pub fn min_capability_tier(mut self, tier: Option<u8>) -> Self {
        self.arbitrageur = self.arbitrageur.with_min_capability_tier(tier);
        self
    }

    pub fn difficulty_threshold(mut self, threshold: f64) -> std::result::Result<Self, ValidationError> {
        self.arbitrageur = self.arbitrageur.with_difficulty_threshold(threshold)?;
        Ok(self)
    }

    pub fn calibration_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn build(self) -> Economist {
        // Substitutes are priced and authorized exactly like the original
        let arbitrageur = self
            .arbitrageur
            .with_components(self.pricer.clone(), self.authority.clone());
        Economist {
            catalog: self.catalog,
            pricer: self.pricer,
            authority: self.authority,
            arbitrageur,
            voc: self.voc,
            calibrator: Calibrator::new(self.min_samples),
        }
    }
}
