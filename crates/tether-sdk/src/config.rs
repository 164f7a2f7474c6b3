use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_channel::ChannelConfig;
use tether_net::NetworkConfig;
use tether_watch::WatchConfig;

use crate::error::SdkResult;

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Every Tether setting, as read from a TOML file.
///
/// ```toml
/// [channel]
/// max_put_passes = 50
///
/// [network]
/// role = "server"
/// flush_delay_ms = 10
///
/// [watch]
/// status_file = "/tmp/tether-status.json"
/// status_interval_secs = 5
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub channel: ChannelConfig,
    pub network: NetworkConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

impl TetherConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_net::Role;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(TetherConfig::from_toml_str("").unwrap(), TetherConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = TetherConfig::from_toml_str(
            r#"
            [channel]
            max_put_passes = 8

            [network]
            role = "server"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.channel.max_put_passes, 8);
        assert_eq!(config.network.role, Role::Server);
        assert_eq!(config.network.flush_delay_ms, NetworkConfig::default().flush_delay_ms);
        assert_eq!(config.logging.level, "debug");
        assert!(config.watch.status_file.is_none());
    }

    #[test]
    fn load_reads_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        let mut config = TetherConfig::default();
        config.watch.status_file = Some(dir.path().join("status.json"));
        config.network = NetworkConfig::server();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(TetherConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(TetherConfig::from_toml_str("[network]\nrole = 3").is_err());
    }
}
