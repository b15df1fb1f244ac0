//! Error types for the economist.
//!
//! A rejected request is not an error: it is a [`crate::Decision`] on the
//! trace. Only malformed input and unknown models fail a call.

use uuid::Uuid;

/// Input rejected while constructing a value object.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Model identifier cannot be empty")]
    EmptyModelName,

    #[error("{field} cannot be negative (got {value})")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} must be between 0.0 and 1.0 (got {value})")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroFanOut { field: &'static str },

    #[error("Rate table lists model '{0}' more than once")]
    DuplicateModel(String),

    #[error("Rate table lists tool '{0}' more than once")]
    DuplicateTool(String),

    #[error("Tool identifier cannot be empty")]
    EmptyToolName,
}

impl ValidationError {
    /// Check that `value` is finite and non-negative.
    pub(crate) fn check_amount(field: &'static str, value: f64) -> std::result::Result<f64, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field });
        }
        if value < 0.0 {
            return Err(ValidationError::Negative { field, value });
        }
        Ok(value)
    }

    /// Check that `value` lies in `[0.0, 1.0]`.
    pub(crate) fn check_unit(field: &'static str, value: f64) -> std::result::Result<f64, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(ValidationError::OutOfUnitRange { field, value });
        }
        Ok(value)
    }
}

/// Errors surfaced by the economist facade and its components.
#[derive(Debug, thiserror::Error)]
pub enum EconomistError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Trace {0} has already been reconciled")]
    AlreadyReconciled(Uuid),
}

pub type Result<T> = std::result::Result<T, EconomistError>;
