use tracing::Level;

use crate::error::{SdkError, SdkResult};

/// Install a global `tracing` subscriber printing events at `level` and
/// above. Fails if the level is unknown or a subscriber is already set.
pub fn init_tracing(level: &str) -> SdkResult<()> {
    let level: Level = level
        .parse()
        .map_err(|_| SdkError::Config(format!("unknown log level `{level}`")))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .map_err(|e| SdkError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_are_rejected() {
        assert!(matches!(init_tracing("loud"), Err(SdkError::Config(_))));
    }
}
