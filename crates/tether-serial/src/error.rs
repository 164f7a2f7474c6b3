use tether_model::ModelError;
use tether_registry::RegistryError;
use tether_types::TypeError;
use thiserror::Error;

/// Errors from serialization and change replay.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerialError {
    #[error(transparent)]
    Types(#[from] TypeError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The document names a class that is not registered.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("serializer for {expected} cannot handle a {found}")]
    ClassMismatch { expected: String, found: String },

    #[error("no serializer registered as `{0}`")]
    UnknownSerializer(String),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),
}

/// Result alias for serialization operations.
pub type SerialResult<T> = Result<T, SerialError>;
