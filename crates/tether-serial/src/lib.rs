//! Serialization layer for Tether objects.
//!
//! A [`TypeSerializer`] is built once per class from its
//! [`TypeDescriptor`](tether_model::TypeDescriptor), keeps only the
//! persistent properties, and converts objects to and from the persisted
//! shape `{_classname, _uuid, ...properties}`. Serializers are cached per
//! class in a [`SerializerCache`].
//!
//! Conversion always happens on behalf of a [`SerialContext`], normally a
//! replication channel. The context resolves references, receives the
//! dependent objects discovered while serializing, and tracks which
//! properties it is currently applying so its own writes are not echoed
//! back.
//!
//! # Malformed Data
//!
//! Values that fail coercion (bad dates, non-numeric integers, values
//! outside an enumeration, unresolvable references) become `null` with a
//! warning. Only an unknown class is fatal, since an object of an unknown
//! class cannot be constructed.
//!
//! # Change Tracking
//!
//! [`TypeSerializer::watch_for_changes`] turns property and collection
//! mutations into [`PropertyChangeEvent`]s; [`serialize_change`] converts
//! them to [`ChangeRecord`](tether_types::ChangeRecord)s, which a
//! [`ChangeStore`] coalesces and [`restore_changes`] replays on a peer.

pub mod cache;
pub mod change;
pub mod coerce;
pub mod context;
pub mod convert;
pub mod error;
pub mod serializer;
pub mod watch;

pub use cache::SerializerCache;
pub use change::{restore_changes, serialize_change, ChangeStore, LiveChange, PropertyChangeEvent};
pub use context::{ChangingCounters, ChangingPropertyGuard, LocalContext, SerialContext};
pub use error::{SerialError, SerialResult};
pub use serializer::{SerialFuture, TypeSerializer};
pub use watch::{ChangeCallback, WatchGuard};

#[cfg(test)]
mod testing;
