//! Error types shared by the payroll components.

use thiserror::Error;

/// Errors raised by the payroll core.
///
/// Partial failures (a payslip batch where some employees failed, a
/// notification fan-out where some companies could not be reached) are
/// not errors; they are reported through the count-carrying report
/// types of the respective modules.
#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PayrollError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PayrollError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PayrollError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PayrollError>;
