//! Error types for the optical object model and the volume pipeline.

use thiserror::Error;

use crate::column::Column;
use crate::id::ObjectId;

/// Signal handed in by an external expression evaluator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Expected a {expected} result")]
    Type { expected: &'static str },
}

/// Errors raised by optical objects, scenes and volume pipelines.
///
/// Numeric degeneracies and bounce-limit truncation are not errors; they are
/// handled where they occur.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpticsError {
    #[error("Column {column} is not supported by {kind} objects")]
    UnsupportedColumn { column: Column, kind: &'static str },

    #[error("Invalid value for {column}: expected {expected}")]
    InvalidValue {
        column: Column,
        expected: &'static str,
    },

    #[error("Unknown {category} name: {name}")]
    UnknownName {
        category: &'static str,
        name: String,
    },

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Grid of {requested} voxels exceeds the limit of {limit}")]
    SizeLimit { requested: u64, limit: u64 },

    #[error("Volume has no voxels")]
    EmptyVolume,

    #[error("Solver did not converge after {iterations} iterations (residual {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },

    #[error("Pipeline is already running")]
    Busy,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),

    #[error("Object {0} cannot emit rays")]
    NotASource(ObjectId),
}

pub type OpticsResult<T> = Result<T, OpticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_error_converts() {
        fn failing() -> OpticsResult<()> {
            Err(ExpressionError::Parse("1 +".to_string()))?;
            Ok(())
        }
        match failing() {
            Err(OpticsError::Expression(ExpressionError::Parse(msg))) => assert_eq!(msg, "1 +"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_messages() {
        let err = OpticsError::UnsupportedColumn {
            column: Column::VolumeScaling,
            kind: "surface",
        };
        assert_eq!(
            err.to_string(),
            "Column Volume Scaling is not supported by surface objects"
        );
        assert_eq!(
            OpticsError::UnknownObject(ObjectId(7)).to_string(),
            "Unknown object: #7"
        );
    }
}
