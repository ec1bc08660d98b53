//! Error types for the field solve and the particle push.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PicError {
    #[error("particle index {index} out of range [0, {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("position ({x}, {y}) lies outside the simulation domain")]
    OutOfDomain { x: f64, y: f64 },

    #[error("linear solve failed: {0}")]
    SolverFailure(String),

    #[error("particle {index} diverged (non-finite state) at step {step}")]
    Divergence { index: usize, step: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch: expected {expected} values, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, PicError>;
