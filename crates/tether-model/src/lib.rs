//! Live object model for Tether.
//!
//! Objects managed by the persistence engine are instances of classes
//! registered up front in a [`ClassRegistry`]. Registration produces an
//! immutable [`TypeDescriptor`] shared by every instance: the ordered
//! property table (inherited properties first), the method table, and the
//! class-level remote-proxy marker. Properties are addressed by the index
//! captured in their [`PropertyDescriptor`], so no name-based dispatch is
//! needed on hot paths.
//!
//! # Key Types
//!
//! - [`ObjectHandle`]: shared handle on one live, identified object
//! - [`Value`]: the dynamically typed content of a property slot
//! - [`OrderedCollection`] / [`KeyedCollection`]: observable collections
//! - [`TypeBuilder`] / [`ClassRegistry`]: explicit class registration
//! - [`MethodForwarder`]: seam through which proxied method calls leave the process
//!
//! # Change Notification
//!
//! Every mutation notifies listeners synchronously, after the mutation is
//! applied and after internal locks are released. Listeners may therefore
//! read (and even mutate) the object they are observing.

pub mod class;
pub mod descriptor;
pub mod error;
pub mod keyed;
pub mod listener;
pub mod method;
pub mod object;
pub mod ordered;
pub mod value;

pub use class::{ClassRegistry, TypeBuilder};
pub use descriptor::{
    LoadCompleteHook, MethodDescriptor, PrimitiveCheck, PropertyDescriptor, PropertyType,
    ReferenceShape, TypeDescriptor, ValueShape,
};
pub use error::{MethodError, ModelError, ModelResult};
pub use keyed::{KeyedCollection, MapEvent, MapMutation};
pub use listener::{ListenerId, ListenerSet};
pub use method::{handler, EndpointLink, MethodForwarder, MethodFuture, MethodHandler};
pub use object::{ObjectHandle, PropertyChange, WeakObjectHandle};
pub use ordered::{ArrayEvent, ArrayMutation, OrderedCollection};
pub use value::{Decimal, OpaqueValue, Value};
