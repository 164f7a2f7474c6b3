use tether_types::TypeError;

/// Errors from backing-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The document is not a JSON object.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The document has no usable `_uuid`.
    #[error("document identity: {0}")]
    Identity(#[from] TypeError),

    /// The query is not a JSON object.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Storage backend is read-only or otherwise unavailable.
    #[error("store is read-only")]
    ReadOnly,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
