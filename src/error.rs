use thiserror::Error;

use crate::{value::Shape, varname::VarName};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PplError {
    #[error("variable {0} is already present in the trace")]
    DuplicateName(VarName),
    #[error("variable {0} is not present in the trace")]
    UnknownName(VarName),
    #[error("dimension mismatch: expected length {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },
    #[error("right hand side of the statement for {lhs} is not a distribution: {reason}")]
    UnsupportedStatementRhs { lhs: String, reason: String },
    #[error("can not decide whether {name} is observed: {reason}")]
    MissingClassification { name: String, reason: String },
    #[error("invalid distribution parameter: {0}")]
    InvalidParameter(String),
    #[error("unsupported transform: {0}")]
    UnsupportedTransform(String),
    #[error("could not materialize trace")]
    Materialize(#[from] arrow::error::ArrowError),
    #[error("model evaluator failed")]
    Evaluator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PplError>;

/// Errors that happen when we evaluate the log density
pub trait LogpError: std::error::Error {
    /// Unrecoverable errors stop the caller, recoverable errors
    /// can be treated as a rejected proposal.
    fn is_recoverable(&self) -> bool;
}

impl LogpError for PplError {
    fn is_recoverable(&self) -> bool {
        matches!(self, PplError::InvalidParameter(_))
    }
}
