use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
