//! Budgets and cost estimates in three currencies.
//!
//! # Invariants
//! - Every set dimension of a [`Budget`] is finite and `>= 0`
//! - Every dimension of a [`CostEstimate`] is populated, finite and `>= 0`
//!
//! Both types are immutable once built. Fields are private so the
//! invariants cannot be bypassed; deserialization goes through the same
//! validating constructors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// One of the three resource dimensions a budget can constrain.
///
/// The declaration order is the order in which the authority checks limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Financial,
    Latency,
    TokenVolume,
}

impl Dimension {
    /// All dimensions in fixed check order.
    pub const ALL: [Dimension; 3] = [Dimension::Financial, Dimension::Latency, Dimension::TokenVolume];

    /// Human-readable label used in decision reasons.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Financial => "Financial",
            Self::Latency => "Latency",
            Self::TokenVolume => "Token volume",
        }
    }

    /// Format an amount of this dimension with its unit.
    pub fn format_amount(&self, value: f64) -> String {
        match self {
            Self::Financial => format!("${:.6}", value),
            Self::Latency => format!("{}ms", value),
            Self::TokenVolume => format!("{} tokens", value),
        }
    }

    /// Format a whole-number amount of this dimension without going through `f64`.
    pub fn format_count(&self, value: u64) -> String {
        match self {
            Self::Financial => self.format_amount(value as f64),
            Self::Latency => format!("{}ms", value),
            Self::TokenVolume => format!("{} tokens", value),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A ceiling on spend, latency and context consumption.
///
/// A dimension left unset is unconstrained. A dimension set to zero is
/// strict: any positive estimate exceeds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BudgetSpec")]
pub struct Budget {
    /// Hard dollar limit (USD)
    financial: Option<f64>,

    /// Time budget in milliseconds
    latency_ms: Option<u64>,

    /// Context window limit in tokens
    token_volume: Option<u64>,
}

impl Budget {
    /// Create a budget from optional dimensions.
    ///
    /// # Errors
    /// Returns `Err` if `financial` is negative or not finite.
    pub fn new(
        financial: Option<f64>,
        latency_ms: Option<u64>,
        token_volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        let financial = financial
            .map(|v| ValidationError::check_amount("financial", v))
            .transpose()?;
        Ok(Self {
            financial,
            latency_ms,
            token_volume,
        })
    }

    /// A budget with every dimension unset.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Return a copy with the financial ceiling set.
    pub fn with_financial(mut self, financial: f64) -> Result<Self, ValidationError> {
        self.financial = Some(ValidationError::check_amount("financial", financial)?);
        Ok(self)
    }

    /// Return a copy with the latency ceiling set.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Return a copy with the token volume ceiling set.
    pub fn with_token_volume(mut self, token_volume: u64) -> Self {
        self.token_volume = Some(token_volume);
        self
    }

    pub fn financial(&self) -> Option<f64> {
        self.financial
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn token_volume(&self) -> Option<u64> {
        self.token_volume
    }

    /// The limit on `dim`, widened to `f64`, if set.
    pub fn limit(&self, dim: Dimension) -> Option<f64> {
        match dim {
            Dimension::Financial => self.financial,
            Dimension::Latency => self.latency_ms.map(|v| v as f64),
            Dimension::TokenVolume => self.token_volume.map(|v| v as f64),
        }
    }

    /// Whether `estimate` goes over the limit on `dim`.
    ///
    /// Latency and token volume compare as integers. An unset limit is
    /// never exceeded.
    pub fn exceeded_by(&self, dim: Dimension, estimate: &CostEstimate) -> bool {
        match dim {
            Dimension::Financial => self.financial.is_some_and(|limit| estimate.financial > limit),
            Dimension::Latency => self.latency_ms.is_some_and(|limit| estimate.latency_ms > limit),
            Dimension::TokenVolume => self
                .token_volume
                .is_some_and(|limit| estimate.token_volume > limit),
        }
    }

    /// The limit on `dim` formatted with its unit, if set.
    pub fn format_limit(&self, dim: Dimension) -> Option<String> {
        match dim {
            Dimension::Financial => self.financial.map(|v| dim.format_amount(v)),
            Dimension::Latency => self.latency_ms.map(|v| dim.format_count(v)),
            Dimension::TokenVolume => self.token_volume.map(|v| dim.format_count(v)),
        }
    }

    /// Whether no dimension is constrained.
    pub fn is_unconstrained(&self) -> bool {
        self.financial.is_none() && self.latency_ms.is_none() && self.token_volume.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
struct BudgetSpec {
    #[serde(default)]
    financial: Option<f64>,
    #[serde(default)]
    latency_ms: Option<u64>,
    #[serde(default)]
    token_volume: Option<u64>,
}

impl TryFrom<BudgetSpec> for Budget {
    type Error = ValidationError;

    fn try_from(spec: BudgetSpec) -> Result<Self, Self::Error> {
        Budget::new(spec.financial, spec.latency_ms, spec.token_volume)
    }
}

/// Projected (or realized) resource consumption of a request.
///
/// Unlike [`Budget`], every dimension is always populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CostEstimateSpec")]
pub struct CostEstimate {
    financial: f64,
    latency_ms: u64,
    token_volume: u64,
}

impl CostEstimate {
    /// Create a cost record.
    ///
    /// # Errors
    /// Returns `Err` if `financial` is negative or not finite.
    pub fn new(financial: f64, latency_ms: u64, token_volume: u64) -> Result<Self, ValidationError> {
        Ok(Self {
            financial: ValidationError::check_amount("financial", financial)?,
            latency_ms,
            token_volume,
        })
    }

    pub fn financial(&self) -> f64 {
        self.financial
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn token_volume(&self) -> u64 {
        self.token_volume
    }

    /// The value of `dim`, widened to `f64`.
    pub fn value(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Financial => self.financial,
            Dimension::Latency => self.latency_ms as f64,
            Dimension::TokenVolume => self.token_volume as f64,
        }
    }

    pub fn format_value(&self, dim: Dimension) -> String {
        match dim {
            Dimension::Financial => dim.format_amount(self.financial),
            Dimension::Latency => dim.format_count(self.latency_ms),
            Dimension::TokenVolume => dim.format_count(self.token_volume),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CostEstimateSpec {
    financial: f64,
    latency_ms: u64,
    token_volume: u64,
}

impl TryFrom<CostEstimateSpec> for CostEstimate {
    type Error = ValidationError;

    fn try_from(spec: CostEstimateSpec) -> Result<Self, Self::Error> {
        CostEstimate::new(spec.financial, spec.latency_ms, spec.token_volume)
    }
}
