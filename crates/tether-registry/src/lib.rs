//! Identity registry for Tether.
//!
//! The [`IdentityRegistry`] is the per-process table of objects in flight
//! and objects loaded, keyed by [`ObjectUuid`](tether_types::ObjectUuid).
//! It guarantees that one identity maps to at most one live object, that
//! concurrent requests for an identity share a single load, and that
//! callers can wait until the whole graph currently being populated has
//! settled.
//!
//! # Entry Lifecycle
//!
//! ```text
//! Loading ──► Constructed ──► Success
//!    │             │             │ stale / reload
//!    └─────────────┴──► Error    └──► Loading (same instance)
//! ```
//!
//! An entry settles (`Success` or `Error`) exactly once per episode. Errors
//! are sticky: they are returned on every access until the entry is
//! forgotten, reloaded, or a fresh copy of the object is deserialized.

pub mod error;
pub mod loader;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use loader::ObjectLoader;
pub use registry::{IdentityRegistry, LoadState, StaleCheck};
