//! High-level SDK for Tether.
//!
//! [`Tether`] is the entry point for applications: register classes in a
//! [`ClassRegistry`], build a `Tether` from a [`TetherConfig`], attach a
//! backing store, and save, load or share objects.

pub mod config;
pub mod error;
pub mod logging;
pub mod tether;

pub use config::{LoggingConfig, TetherConfig};
pub use error::{SdkError, SdkResult};
pub use logging::init_tracing;
pub use tether::Tether;

// Re-export key types
pub use tether_model::{ClassRegistry, ObjectHandle, PropertyDescriptor, TypeBuilder, Value, ValueShape};
pub use tether_net::{LoopbackTransport, NetworkChannel, NetworkConfig, Role};
pub use tether_store::{BackingStore, InMemoryBackingStore};
pub use tether_types::ObjectUuid;
pub use tether_watch::WatcherStatus;
