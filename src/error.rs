//! Error types.
//!
//! Structural problems (bad input columns, mis-shaped priors, incompatible draw sets, invalid
//! configuration) are [`Error`]s and are raised before any sampling work starts. Statistical
//! quality problems are not errors: they are reported as
//! [`ConvergenceWarning`](crate::diagnostics::ConvergenceWarning)s on every fit.

use crate::diagnostics::ConvergenceWarning;
use crate::regression::ChainFailure;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Malformed observation table or model specification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("column `{0}` is not present in the observation table")]
    MissingColumn(String),

    #[error("column `{0}` is defined twice")]
    DuplicateColumn(String),

    #[error("column `{column}` is {found} but the model declares it {expected}")]
    WrongKind {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column `{column}` has {got} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("value `{value}` in column `{column}` (row {row}) is not a declared level")]
    UnknownLevel {
        column: String,
        row: usize,
        value: String,
    },

    #[error("non-finite value in continuous column `{column}` (row {row})")]
    NonFinite { column: String, row: usize },

    #[error("invalid term `{term}`: {reason}")]
    InvalidTerm { term: String, reason: String },

    #[error("profile has no value for term `{0}`")]
    MissingProfileValue(String),
}

/// Errors raised by the inference engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("prior list has {got} entries but the design has {expected} non-intercept coefficients")]
    PriorShape { expected: usize, got: usize },

    #[error("invalid prior for `{term}`: {reason}")]
    InvalidPrior { term: String, reason: String },

    #[error("draw set `{label}` has {got} coefficients, expected {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        got: usize,
    },

    #[error("draw set `{label}` has terms {got:?}, expected {expected:?}")]
    TermMismatch {
        label: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("a comparison needs at least two fits, got {0}")]
    TooFewFits(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("all {} chains failed", .0.len())]
    AllChainsFailed(Vec<ChainFailure>),

    #[error("fit did not converge ({} warning(s))", .0.len())]
    NotConverged(Vec<ConvergenceWarning>),
}
