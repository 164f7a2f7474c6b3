//! Replication channels for Tether.
//!
//! A [`ReplicationChannel`] is anything objects can be saved through: a
//! document store, a network peer. Every channel shares the same put
//! protocol, implemented once as provided trait methods:
//!
//! 1. `put` grabs the channel's put queue (reentrant) and serializes the
//!    object. References discovered along the way are queued as dependents
//!    instead of being serialized recursively.
//! 2. Only the outermost release drains the dependent queue, pass after
//!    pass, until no new dependents appear, then flushes the channel.
//! 3. The drain is bounded by [`ChannelConfig::max_put_passes`]. Exceeding
//!    it means serialization keeps discovering "new" objects, which is a
//!    bug, so it fails with [`ChannelError::TooManyPutPasses`].
//!
//! [`StoreChannel`] is the storage-backed channel over a
//! [`BackingStore`](tether_store::BackingStore).

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod store;

pub use channel::{ObjectData, ReplicationChannel};
pub use config::ChannelConfig;
pub use endpoint::EndpointCore;
pub use error::{ChannelError, ChannelResult};
pub use store::StoreChannel;
