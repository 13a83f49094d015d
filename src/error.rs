use sem_engine::SemError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Specification and fitting failures reported by the engine, unchanged.
    #[error(transparent)]
    Engine(#[from] SemError),

    #[error("result record is missing field `{0}`")]
    MissingField(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_specification(&self) -> bool {
        matches!(self, Error::Engine(SemError::Specification(_)))
    }

    /// True for failures raised while estimating: absent or non-numeric
    /// columns, unusable data, an unidentified model or optimiser failure.
    pub fn is_fitting(&self) -> bool {
        matches!(
            self,
            Error::Engine(
                SemError::MissingColumn(_)
                    | SemError::NonNumericColumn(_)
                    | SemError::Fit(_)
                    | SemError::Data(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
