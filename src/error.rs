use thiserror::Error;

/// Failure taxonomy for a NEB run.
///
/// Every variant is fatal for the current scheduler run. A run that merely
/// exhausts its cycle budget is not an error; see `NebOutcome::converged`.
#[derive(Debug, Error)]
pub enum NebError {
    /// Unknown scheme, inconsistent images, malformed inputs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external helper (e.g. the interpolation tool) failed.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// The potential-energy evaluator reported a failure.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Evaluator output could not be correlated with the submitted structures.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no valid energy found in the chain")]
    NoValidEnergy,

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = NebError> = std::result::Result<T, E>;

impl From<serde_json::Error> for NebError {
    fn from(e: serde_json::Error) -> Self {
        NebError::Configuration(e.to_string())
    }
}

impl From<csv::Error> for NebError {
    fn from(e: csv::Error) -> Self {
        NebError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
