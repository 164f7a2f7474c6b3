//! Network replication for Tether.
//!
//! A [`NetworkChannel`] replicates objects to one peer. It is a
//! [`ReplicationChannel`](tether_channel::ReplicationChannel), so the put
//! protocol is shared with the storage channel; what differs is where the
//! JSON goes. Packets are batched into JSON arrays and carried by a
//! [`Transport`]: in-process with [`LoopbackTransport`], or over any byte
//! stream with [`StreamTransport`] and the length-prefixed
//! [`PacketCodec`].
//!
//! # Session
//!
//! The client sends `open` and waits for its `return`. A server peer first
//! pushes every published object with its URI mapping, so they are
//! resolvable by [`NetworkChannel::get_by_uri`] once `open` resolves.
//!
//! # Replication
//!
//! Every object sent or received stays watched by the process-wide
//! [`FanoutChangeWatcher`](tether_watch::FanoutChangeWatcher). Mutations
//! are coalesced per object and leave as one `sendPropertyChanges` packet
//! per flush. Changes applied from a peer are not echoed back.
//!
//! # Remote Methods
//!
//! Remote methods of proxied classes invoked on objects received from a
//! peer are forwarded over the channel. Calls are correlated by packet id;
//! closing the channel rejects every outstanding call.

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
mod inbound;
pub mod packet;
pub mod transport;
pub mod upload;
pub mod uri;
mod wire;

pub use channel::{ChannelState, NetworkChannel, NetworkShared, SendState};
pub use codec::{PacketCodec, MAX_BATCH_SIZE};
pub use config::{NetworkConfig, Role};
pub use error::{NetError, NetResult};
pub use hub::NetworkHub;
pub use packet::{Packet, PacketBody, UploadChunk, WireValue};
pub use transport::{LoopbackTransport, PacketSink, StreamTransport, Transport};
pub use upload::UploadHandler;
pub use uri::UriDirectory;
