//! Learning from realized costs.
//!
//! # How It Works
//!
//! 1. After execution the caller reconciles a trace with the actual cost
//! 2. The variance between estimate and actual is computed per dimension
//! 3. The observed output/input token ratio is folded into a running mean
//! 4. Once enough samples exist, the mean becomes the recommended ratio
//!
//! The recommendation is advisory. Nothing here reconfigures the pricer.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::CostEstimate;

/// Signed difference `actual - estimated` on each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetVariance {
    pub financial: f64,
    pub latency_ms: i64,
    pub token_volume: i64,
}

impl BudgetVariance {
    pub fn between(estimated: &CostEstimate, actual: &CostEstimate) -> Self {
        Self {
            financial: actual.financial() - estimated.financial(),
            latency_ms: signed_diff(actual.latency_ms(), estimated.latency_ms()),
            token_volume: signed_diff(actual.token_volume(), estimated.token_volume()),
        }
    }

    /// Whether the actual spend exceeded the estimate.
    pub fn overspent(&self) -> bool {
        self.financial > 0.0
    }
}

fn signed_diff(actual: u64, estimated: u64) -> i64 {
    let diff = actual as i128 - estimated as i128;
    diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Output tokens per input token implied by a realized token count.
///
/// `actual_tokens` covers every round, so it is first spread over `rounds`
/// to get the per-round volume the pricer works with. Then
/// `max(0, per_round - input_tokens) / input_tokens`, or 0 with no input.
pub fn observed_output_ratio(input_tokens: u64, actual_tokens: u64, rounds: u32) -> f64 {
    if input_tokens == 0 {
        return 0.0;
    }
    let per_round = actual_tokens as f64 / rounds.max(1) as f64;
    (per_round - input_tokens as f64).max(0.0) / input_tokens as f64
}

/// Outcome of reconciling one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub trace_id: Uuid,
    pub variance: BudgetVariance,
    pub observed_output_ratio: f64,
    pub recommended_output_ratio: f64,
    pub samples: u64,
}

/// Point-in-time view of the calibration statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStats {
    pub samples: u64,
    pub mean_output_ratio: f64,
    pub min_samples: u64,
    pub recommended_output_ratio: f64,
}

#[derive(Debug, Default)]
struct RunningMean {
    count: u64,
    mean: f64,
}

/// Running statistics over observed output ratios.
#[derive(Debug)]
pub struct Calibrator {
    min_samples: u64,
    stats: Mutex<RunningMean>,
}

impl Calibrator {
    pub const DEFAULT_MIN_SAMPLES: u64 = 5;

    pub fn new(min_samples: u64) -> Self {
        Self {
            min_samples,
            stats: Mutex::new(RunningMean::default()),
        }
    }

    pub fn min_samples(&self) -> u64 {
        self.min_samples
    }

    /// Fold in one observed ratio, returning `(samples, recommended_ratio)`.
    ///
    /// `fallback` is recommended until `min_samples` observations exist.
    pub fn record(&self, observed: f64, fallback: f64) -> (u64, f64) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.count += 1;
        stats.mean += (observed - stats.mean) / stats.count as f64;
        (stats.count, self.recommend(&stats, fallback))
    }

    pub fn snapshot(&self, fallback: f64) -> CalibrationStats {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        CalibrationStats {
            samples: stats.count,
            mean_output_ratio: stats.mean,
            min_samples: self.min_samples,
            recommended_output_ratio: self.recommend(&stats, fallback),
        }
    }

    fn recommend(&self, stats: &RunningMean, fallback: f64) -> f64 {
        if stats.count >= self.min_samples && stats.count > 0 {
            stats.mean
        } else {
            fallback
        }
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_SAMPLES)
    }
}
