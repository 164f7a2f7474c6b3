use tether_types::ObjectUuid;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A single-subscriber watcher was asked to serve a second subscriber.
    #[error("object {uuid} is already watched by subscriber {existing}")]
    SubscriberConflict {
        uuid: ObjectUuid,
        existing: ObjectUuid,
    },

    #[error("status file i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("status encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;
