//! Change watchers for Tether.
//!
//! A watcher installs listeners on watched objects and turns every
//! persistent mutation into a [`ChangeRecord`](tether_types::ChangeRecord),
//! serialized on behalf of each subscribing channel and delivered through
//! [`WatchSubscriber::property_changed`]. Changes that a subscriber is itself
//! applying are not reported back to it, and an object is only marked dirty
//! when at least one subscriber accepted the change.
//!
//! - [`ChangeWatcher`] serves exactly one subscriber (storage channels).
//! - [`FanoutChangeWatcher`] is shared by many subscribers and reference
//!   counts each (object, subscriber) pair (network channels).
//!
//! Both can periodically dump their [`WatcherStatus`] to a file through
//! [`spawn_status_writer`].

pub mod config;
pub mod error;
mod shared;
pub mod status;
pub mod subscriber;
pub mod watcher;

pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use status::{spawn_status_writer, write_status_file, StatusSource, WatcherStatus};
pub use subscriber::WatchSubscriber;
pub use watcher::{ChangeWatcher, FanoutChangeWatcher};
