use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_types::ObjectUuid;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WatchResult;

/// Snapshot of a watcher's bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub num_watched_objects: usize,
    pub num_dirty_objects: usize,
    pub dirty: Vec<ObjectUuid>,
}

/// Anything that can report a [`WatcherStatus`].
pub trait StatusSource: Send + Sync {
    fn status(&self) -> WatcherStatus;
}

/// Write `status` as pretty JSON, replacing the file atomically.
pub fn write_status_file(path: &Path, status: &WatcherStatus) -> WatchResult<()> {
    let data = serde_json::to_vec_pretty(status)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Periodically write the source's status to `path`.
///
/// The task holds the source weakly and stops once it is dropped.
pub fn spawn_status_writer(
    source: &Arc<dyn StatusSource>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    let source: Weak<dyn StatusSource> = Arc::downgrade(source);
    tokio::spawn(async move {
        loop {
            let Some(watcher) = source.upgrade() else {
                debug!(path = %path.display(), "watcher dropped, stopping status writer");
                break;
            };
            let status = watcher.status();
            drop(watcher);
            if let Err(e) = write_status_file(&path, &status) {
                warn!(path = %path.display(), error = %e, "failed to write watcher status");
            }
            tokio::time::sleep(interval).await;
        }
    })
}
