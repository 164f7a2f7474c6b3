use serde::{Deserialize, Serialize};

/// Settings shared by every replication channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound on dependent-object drain passes per outermost put.
    pub max_put_passes: usize,
}

impl ChannelConfig {
    pub const DEFAULT_MAX_PUT_PASSES: usize = 50;
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_put_passes: Self::DEFAULT_MAX_PUT_PASSES,
        }
    }
}
