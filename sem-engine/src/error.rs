use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SemError {
    #[error("model specification error: {0}")]
    Specification(String),

    #[error("observed variable {0} not found in data")]
    MissingColumn(String),

    #[error("column {0} is not numeric")]
    NonNumericColumn(String),

    #[error("fit error: {0}")]
    Fit(String),

    #[error("model has not been fitted")]
    NotFitted,

    #[error("data error: {0}")]
    Data(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, SemError>;

pub(crate) fn spec_err(msg: impl Into<String>) -> SemError {
    SemError::Specification(msg.into())
}

pub(crate) fn fit_err(msg: impl Into<String>) -> SemError {
    SemError::Fit(msg.into())
}
