//! # Compute Economist
//!
//! Admission control and stopping decisions for agentic compute workflows.
//!
//! Before a unit of work runs (a model call, a multi-agent debate, a tool
//! call) the economist projects its cost and decides whether it fits the
//! caller's budget. While a multi-step reasoning process runs, it decides
//! whether another step is still worth paying for.
//!
//! ## Architecture
//!
//! ```text
//!   RequestPayload ──► Economist::check_execution
//!                         │
//!                         ├─► Pricer ──────────► CostEstimate
//!                         ├─► BudgetAuthority ─► Approved / Rejected
//!                         └─► Arbitrageur ─────► cheaper Alternative
//!                         ▼
//!                   EconomicTrace ──► reconcile ──► CalibrationResult
//!
//!   ReasoningTrace ──► Economist::should_continue ──► VocEngine ──► VocResult
//! ```
//!
//! ## Modules
//! - `budget`: budgets, rate catalog, pricer, authority, arbitrage, calibration
//! - `voc`: value-of-computation stopping engine
//! - `trace`: the auditable decision record
//! - `economist`: the facade composing all of the above
//! - `api`: HTTP service over the facade

pub mod api;
pub mod budget;
pub mod config;
pub mod economist;
pub mod error;
pub mod request;
pub mod trace;
pub mod voc;

pub use budget::{Alternative, Budget, CostEstimate, RateCard, RateCatalog, RateTable};
pub use config::Config;
pub use economist::{Economist, EconomistBuilder};
pub use error::{EconomistError, ValidationError};
pub use request::RequestPayload;
pub use trace::{Decision, EconomicTrace};
pub use voc::{ReasoningTrace, VocDecision, VocEngine, VocResult};
