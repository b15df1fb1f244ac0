//! Budget module - pricing, authorization and arbitrage.
//!
//! # Key Concepts
//! - Budget: a ceiling on spend, latency and token volume
//! - Pricing: rate cards and the shared, atomically replaceable catalog
//! - Pricer: projects the cost of a request before it runs
//! - Authority: approves or rejects an estimate against a budget
//! - Arbitrage: finds cheaper substitutes the authority would approve
//! - Learned: variance and output-ratio calibration from realized costs

mod arbitrage;
mod authority;
mod budget;
mod learned;
mod pricer;
mod pricing;

pub use arbitrage::{Alternative, Arbitrageur, SubstitutionStrategy};
pub use authority::{Authorization, BudgetAuthority};
pub use budget::{Budget, CostEstimate, Dimension};
pub use learned::{observed_output_ratio, BudgetVariance, CalibrationResult, CalibrationStats, Calibrator};
pub use pricer::{count_tokens, FanOutPolicy, Pricer, CHARS_PER_TOKEN};
pub use pricing::{ModelRateSpec, RateCard, RateCatalog, RateTable, RateTableSpec, ToolRate, ToolRateSpec};
