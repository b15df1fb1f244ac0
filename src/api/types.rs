//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::budget::CostEstimate;
use crate::voc::{ReasoningTrace, VocOptions};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Models in the current rate table
    pub models: usize,

    /// Traces held by the trace store
    pub traces: usize,

    /// Whether traces survive a restart
    pub persistent_traces: bool,
}

/// Request to evaluate whether reasoning should continue.
#[derive(Debug, Clone, Deserialize)]
pub struct VocRequest {
    /// The reasoning steps so far
    pub trace: ReasoningTrace,

    /// Threshold override and budget context
    #[serde(default)]
    pub options: VocOptions,
}

/// Request to record the realized cost of a trace.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    pub actual_cost: CostEstimate,
}

/// Response after replacing the rate table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesUpdatedResponse {
    pub models: usize,
    pub previous_models: usize,
}
