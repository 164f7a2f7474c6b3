use tether_types::ObjectUuid;
use thiserror::Error;

/// Errors from class registration and object access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("class already registered: {0}")]
    DuplicateClass(String),

    #[error("property `{property}` is already declared on {class}")]
    DuplicateProperty { class: String, property: String },

    #[error("{class} has no property `{property}`")]
    UnknownProperty { class: String, property: String },

    #[error("{class} has no property at index {index}")]
    PropertyIndex { class: String, index: usize },

    #[error("cannot assign a {found} to {class}.{property}")]
    TypeMismatch {
        class: String,
        property: String,
        found: &'static str,
    },

    #[error("object {uuid} is already associated with another endpoint")]
    EndpointMismatch { uuid: ObjectUuid },

    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors produced by method invocation, local or forwarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MethodError {
    #[error("{class} has no method `{method}`")]
    UnknownMethod { class: String, method: String },

    #[error("{class}.{method} is not remotely invocable")]
    NotRemote { class: String, method: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("method failed: {0}")]
    Failed(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("call aborted")]
    Aborted,

    #[error("channel is closed")]
    ChannelClosed,
}
