//! Error types for lpx

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum LpxError {
    /// A caller broke a precondition (buffer shapes, engine geometry).
    /// Carries only a static message so real-time paths can return it.
    #[error("Contract violation: {0}")]
    ContractViolation(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid IR length: expected {expected} samples, got {actual}")]
    InvalidIrLength { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LpxError {
    /// True for the allocation-free precondition kind
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, LpxError::ContractViolation(_))
    }
}

impl From<serde_json::Error> for LpxError {
    fn from(err: serde_json::Error) -> Self {
        LpxError::Config(err.to_string())
    }
}

/// Result type alias
pub type LpxResult<T> = Result<T, LpxError>;
