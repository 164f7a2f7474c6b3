//! Backing-store collaborator for Tether storage channels.
//!
//! The persistence engine treats its document store as an opaque
//! collaborator: it stores JSON documents of the shape
//! `{_classname, _uuid, ...properties}` and looks them up with simple
//! equality queries. Only `_uuid` and `_classname` (plus the channel's own
//! `_mtime` stamp) are relied upon; everything else is stored verbatim.
//!
//! All backends implement the [`BackingStore`] trait:
//!
//! - [`InMemoryBackingStore`] -- `BTreeMap`-based store for tests and embedding

pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackingStore;
pub use query::{Projection, Query};
pub use traits::BackingStore;
