use tether_model::ModelError;
use tether_types::ObjectUuid;
use thiserror::Error;

/// Errors from identity registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A different live object is already registered for this identity.
    #[error("object {uuid} ({class}) is already constructed")]
    DuplicateIdentity { uuid: ObjectUuid, class: String },

    #[error("object {uuid} is a {found}, not a {expected}")]
    ClassMismatch {
        uuid: ObjectUuid,
        expected: String,
        found: String,
    },

    /// The object's load episode ended in an error.
    #[error("loading {uuid} failed: {reason}")]
    LoadFailed { uuid: ObjectUuid, reason: String },

    /// Failure reported by an object loader.
    #[error("loader error: {0}")]
    Loader(String),
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
