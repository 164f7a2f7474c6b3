//! Foundation types for Tether.
//!
//! This crate provides the identity, classification, and change-record types
//! shared by every other Tether crate. Nothing here knows about live objects
//! or transports; these are the plain values that cross those boundaries.
//!
//! # Key Types
//!
//! - [`ObjectUuid`]: stable identity of one replicable object (UUID v7 when generated)
//! - [`ValueKind`]: how a property's value is converted to and from JSON
//! - [`ChangeRecord`]: JSON-ready description of one property mutation
//! - [`ChangeBundle`]: the pending changes of one object, keyed by property name
//!
//! The [`fields`] module fixes the persisted document shape:
//! `{_classname, _uuid, ...properties}`.

pub mod change;
pub mod error;
pub mod fields;
pub mod identity;
pub mod kind;

pub use change::{ChangeBundle, ChangeRecord};
pub use error::{TypeError, TypeResult};
pub use fields::{CLASSNAME_FIELD, MTIME_FIELD, QUERY_FIELD, UUID_FIELD};
pub use identity::ObjectUuid;
pub use kind::ValueKind;
