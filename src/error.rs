use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Rejected at the boundary: oversize text, out-of-range scores, bad JSON.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A computed value left its legal range. Indicates a bug in the engine.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed comparison input: {err}"))
    }
}
