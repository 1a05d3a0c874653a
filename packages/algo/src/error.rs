//! Error types for quizmab-algo.

use thiserror::Error;

/// Errors raised by the bandit algorithms.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BanditError {
    /// Arm parameters or counters violate an invariant.
    #[error("invalid arm state: {0}")]
    InvalidState(String),

    /// Configuration value outside its documented range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type BanditResult<T> = Result<T, BanditError>;
