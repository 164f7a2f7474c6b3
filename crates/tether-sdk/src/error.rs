use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no backing store attached")]
    NoStore,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] tether_model::ModelError),

    #[error("registry error: {0}")]
    Registry(#[from] tether_registry::RegistryError),

    #[error("channel error: {0}")]
    Channel(#[from] tether_channel::ChannelError),

    #[error("network error: {0}")]
    Net(#[from] tether_net::NetError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
