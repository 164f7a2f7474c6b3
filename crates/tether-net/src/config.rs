use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side of a session a channel plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    /// Pushes published objects to the peer before acknowledging `open`.
    Server,
}

/// Network channel settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub role: Role,
    /// Delay between a watched change and the flush that carries it, so
    /// that bursts of mutations travel in one batch.
    pub flush_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            flush_delay_ms: 10,
        }
    }
}

impl NetworkConfig {
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Self::default()
        }
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: NetworkConfig = serde_json::from_str(r#"{"role": "server"}"#).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.flush_delay(), Duration::from_millis(10));
    }
}
