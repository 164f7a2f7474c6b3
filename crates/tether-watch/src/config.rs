use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Watcher settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Where to periodically write the watcher status. Disabled when unset.
    pub status_file: Option<PathBuf>,
    pub status_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            status_file: None,
            status_interval_secs: 5,
        }
    }
}

impl WatchConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}
