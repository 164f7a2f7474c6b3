use tether_channel::ChannelError;
use tether_model::MethodError;
use tether_registry::RegistryError;
use tether_serial::SerialError;
use tether_types::ObjectUuid;
use tether_watch::WatchError;
use thiserror::Error;

/// Errors from network channels, transports and the packet codec.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Method(#[from] MethodError),

    /// The channel is not open.
    #[error("channel is closed")]
    ChannelClosed,

    /// The call was still pending when the channel closed.
    #[error("call aborted: channel closed")]
    Aborted,

    /// The peer does not know the target object.
    #[error("object {0} has not been shared with the peer")]
    ObjectNotShared(ObjectUuid),

    #[error("unknown object {0}")]
    UnknownObject(ObjectUuid),

    /// Error reported by the peer in a `return` packet.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("upload rejected: {0}")]
    Upload(String),

    #[error("transport disconnected")]
    Disconnected,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("batch too large: {size} bytes (max {max})")]
    BatchTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for network operations.
pub type NetResult<T> = Result<T, NetError>;

impl From<NetError> for ChannelError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Channel(inner) => inner,
            NetError::Serial(inner) => ChannelError::Serial(inner),
            NetError::Registry(inner) => ChannelError::Registry(inner),
            NetError::Watch(inner) => ChannelError::Watch(inner),
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

impl From<NetError> for MethodError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Method(inner) => inner,
            NetError::Aborted => MethodError::Aborted,
            NetError::ChannelClosed => MethodError::ChannelClosed,
            NetError::Remote(message) => MethodError::Remote(message),
            other => MethodError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_errors_unwrap_on_the_way_back() {
        let err = NetError::Channel(ChannelError::TooManyPutPasses { max: 3 });
        assert!(matches!(
            ChannelError::from(err),
            ChannelError::TooManyPutPasses { max: 3 }
        ));
        assert!(matches!(
            ChannelError::from(NetError::Disconnected),
            ChannelError::Transport(_)
        ));
    }

    #[test]
    fn method_errors_keep_their_meaning() {
        assert_eq!(MethodError::from(NetError::Aborted), MethodError::Aborted);
        assert_eq!(
            MethodError::from(NetError::Remote("boom".into())),
            MethodError::Remote("boom".into())
        );
        assert_eq!(
            MethodError::from(NetError::ChannelClosed),
            MethodError::ChannelClosed
        );
    }
}
