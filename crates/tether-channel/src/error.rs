use tether_registry::RegistryError;
use tether_serial::SerialError;
use tether_store::StoreError;
use tether_watch::WatchError;
use thiserror::Error;

/// Errors from replication channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Saving kept discovering new dependent objects.
    #[error("dependent objects did not settle within {max} put passes")]
    TooManyPutPasses { max: usize },

    #[error("transport: {0}")]
    Transport(String),
}

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
