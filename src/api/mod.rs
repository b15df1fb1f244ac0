//! HTTP API for the compute economist.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/economist/check` - Price and authorize a request, storing the trace
//! - `POST /api/economist/voc` - Decide whether reasoning should continue
//! - `GET /api/economist/traces/{id}` - Get a stored trace
//! - `POST /api/economist/traces/{id}/reconcile` - Record the actual cost of a trace
//! - `GET /api/economist/rates` - Current rate table
//! - `PUT /api/economist/rates` - Replace the rate table atomically
//! - `GET /api/economist/calibration` - Output ratio calibration statistics

mod routes;
pub mod trace_store;
pub mod types;

pub use routes::{router, serve, AppState};
pub use trace_store::{InMemoryTraceStore, TraceHandle, TraceStore};
pub use types::*;
