use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use serde_json::Value as Json;
use tether_channel::{ChannelResult, EndpointCore, ObjectData, ReplicationChannel};
use tether_model::{
    EndpointLink, MethodError, MethodForwarder, MethodFuture, ObjectHandle, PropertyDescriptor,
    Value,
};
use tether_registry::{IdentityRegistry, LoadState};
use tether_serial::{ChangeStore, LocalContext, SerialContext, SerialResult, SerializerCache};
use tether_types::{ChangeBundle, ChangeRecord, ObjectUuid};
use tether_watch::{FanoutChangeWatcher, WatchSubscriber};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::{NetworkConfig, Role};
use crate::error::{NetError, NetResult};
use crate::packet::{Packet, PacketBody, UploadChunk, WireValue};
use crate::transport::{PacketSink, Transport};
use crate::upload::UploadHandler;
use crate::uri::UriDirectory;

/// Session state of a [`NetworkChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
}

/// Whether the peer knows an object, and which side introduced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    /// We sent it.
    Sent,
    /// The peer sent it.
    Received,
}

/// Collaborators shared by every channel of one process.
#[derive(Clone)]
pub struct NetworkShared {
    pub registry: Arc<IdentityRegistry>,
    pub serializers: Arc<SerializerCache>,
    pub watcher: Arc<FanoutChangeWatcher>,
    pub uris: Arc<UriDirectory>,
    /// Identifies this process instance to peers, so a restarted peer can
    /// be told apart from a reconnecting one.
    pub instance_hash: String,
}

pub(crate) type CallReply = oneshot::Sender<NetResult<Option<WireValue>>>;

pub(crate) struct Outgoing {
    body: PacketBody,
    origin: Option<u64>,
    reply: Option<CallReply>,
}

#[derive(Clone, Debug)]
struct PeerInfo {
    uuid: ObjectUuid,
    instance_hash: String,
}

#[derive(Default)]
pub(crate) struct NetState {
    outgoing: VecDeque<Outgoing>,
    last_packet_id: u64,
    pending_calls: HashMap<u64, CallReply>,
    send_states: HashMap<ObjectUuid, SendState>,
    /// Received documents that could not be built into live objects.
    unbuilt: HashMap<ObjectUuid, Json>,
    change_stores: BTreeMap<ObjectUuid, ChangeStore>,
    remote_uris: BTreeMap<String, ObjectUuid>,
    peer: Option<PeerInfo>,
}

enum Inbound {
    Batch(Vec<Packet>),
    Disconnected,
}

struct InboundSink(mpsc::UnboundedSender<Inbound>);

impl PacketSink for InboundSink {
    fn deliver(&self, batch: Vec<Packet>) {
        if self.0.send(Inbound::Batch(batch)).is_err() {
            trace!("inbound worker gone, dropping batch");
        }
    }

    fn disconnected(&self) {
        let _ = self.0.send(Inbound::Disconnected);
    }
}

/// A replication channel to one peer over a [`Transport`].
///
/// Objects put through the channel travel as `sendObject` packets and stay
/// watched; later mutations are coalesced per object and travel as one
/// `sendPropertyChanges` packet per flush. Objects received from the peer
/// are associated with the channel, so remote methods of proxied classes
/// invoked on them are forwarded to the peer.
///
/// Inbound packets are processed strictly in arrival order by one worker
/// task. Outbound packets get their ids when they are taken from the queue
/// and leave in that order.
///
/// Method bodies invoked by the peer are the exception: each runs in its own
/// task once its arguments are resolved, so calls start in arrival order but
/// may overlap and finish in any order, even on the same object. Methods
/// that need mutual exclusion must provide it themselves.
pub struct NetworkChannel {
    core: EndpointCore,
    config: NetworkConfig,
    shared: NetworkShared,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ChannelState>,
    shut_down: AtomicBool,
    flush_scheduled: AtomicBool,
    inner: Mutex<NetState>,
    flush_lock: tokio::sync::Mutex<()>,
    uploads: RwLock<Option<Arc<dyn UploadHandler>>>,
    self_ref: Weak<NetworkChannel>,
}

impl NetworkChannel {
    /// Create a channel over `transport` and start its inbound worker.
    /// Must be called within a Tokio runtime.
    pub fn new(
        shared: NetworkShared,
        transport: Arc<dyn Transport>,
        channel_config: tether_channel::ChannelConfig,
        config: NetworkConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Closed);
        let channel = Arc::new_cyclic(|self_ref| Self {
            core: EndpointCore::new(
                Arc::clone(&shared.registry),
                Arc::clone(&shared.serializers),
                channel_config,
            ),
            config,
            shared,
            transport,
            state,
            shut_down: AtomicBool::new(false),
            flush_scheduled: AtomicBool::new(false),
            inner: Mutex::new(NetState::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            uploads: RwLock::new(None),
            self_ref: self_ref.clone(),
        });
        channel.transport.bind(Arc::new(InboundSink(tx)));
        tokio::spawn(run_inbound(Arc::downgrade(&channel), rx));
        debug!(channel = %channel.core.id(), role = ?channel.config.role, "network channel created");
        channel
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, NetState> {
        self.inner.lock().expect("channel lock poisoned")
    }

    pub fn id(&self) -> ObjectUuid {
        self.core.id()
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// `true` once the channel has been closed for good.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn send_state(&self, uuid: ObjectUuid) -> Option<SendState> {
        self.lock().send_states.get(&uuid).copied()
    }

    /// The peer's channel id, once it has opened the session.
    pub fn peer_id(&self) -> Option<ObjectUuid> {
        self.lock().peer.as_ref().map(|p| p.uuid)
    }

    /// Calls waiting for their `return`, queued or sent.
    pub fn in_flight_calls(&self) -> usize {
        let state = self.lock();
        state.pending_calls.len() + state.outgoing.iter().filter(|o| o.reply.is_some()).count()
    }

    pub fn set_upload_handler(&self, handler: Arc<dyn UploadHandler>) {
        *self.uploads.write().expect("upload lock poisoned") = Some(handler);
    }

    pub(crate) fn upload_handler(&self) -> Option<Arc<dyn UploadHandler>> {
        self.uploads.read().expect("upload lock poisoned").clone()
    }

    pub(crate) fn shared(&self) -> &NetworkShared {
        &self.shared
    }

    pub(crate) fn core_ref(&self) -> &EndpointCore {
        &self.core
    }

    /// Open the session: announce ourselves and wait for the peer's
    /// acknowledgement. A server peer pushes its published objects first.
    pub async fn open(&self) -> NetResult<()> {
        if self.is_shut_down() {
            return Err(NetError::ChannelClosed);
        }
        match self.state() {
            ChannelState::Open => return Ok(()),
            ChannelState::Opening => {
                let mut rx = self.state.subscribe();
                let state = rx
                    .wait_for(|s| *s != ChannelState::Opening)
                    .await
                    .map(|s| *s)
                    .unwrap_or(ChannelState::Closed);
                return match state {
                    ChannelState::Open => Ok(()),
                    _ => Err(NetError::ChannelClosed),
                };
            }
            ChannelState::Closed => {}
        }

        self.state.send_replace(ChannelState::Opening);
        let reply = self.queue_call(
            PacketBody::Open {
                uuid: self.core.id(),
                instance_hash: self.shared.instance_hash.clone(),
            },
            true,
        );
        self.flush_outgoing().await?;
        reply.await.map_err(|_| NetError::Aborted)??;
        self.state.send_if_modified(|s| {
            let opened = *s == ChannelState::Opening;
            if opened {
                *s = ChannelState::Open;
            }
            opened
        });
        info!(channel = %self.core.id(), "channel open");
        Ok(())
    }

    /// Invoke a remote method of an object the peer knows, and wait for
    /// its result.
    pub async fn call_remote_method(
        &self,
        uuid: ObjectUuid,
        method: &str,
        args: Vec<Value>,
    ) -> NetResult<Value> {
        if !self.is_open() {
            return Err(NetError::ChannelClosed);
        }
        if !self.is_object_sent(uuid) {
            return Err(NetError::ObjectNotShared(uuid));
        }
        let mut wire = Vec::with_capacity(args.len());
        for arg in &args {
            wire.push(self.to_wire(arg).await?);
        }
        // The pending-call entry is gone once the return is processed; the
        // receiver is the only handle on the result.
        let reply = self.queue_call(
            PacketBody::CallMethod {
                uuid,
                method_name: method.to_string(),
                args: wire,
            },
            false,
        );
        self.flush_outgoing().await?;
        let result = reply.await.map_err(|_| NetError::Aborted)??;
        Ok(result.map_or(Value::Null, |value| self.from_wire(&value)))
    }

    /// Send one upload chunk and wait for the peer's acknowledgement.
    pub async fn send_upload(&self, chunk: UploadChunk) -> NetResult<()> {
        if !self.is_open() {
            return Err(NetError::ChannelClosed);
        }
        let reply = self.queue_call(PacketBody::Upload(chunk), false);
        self.flush_outgoing().await?;
        reply.await.map_err(|_| NetError::Aborted)??;
        Ok(())
    }

    /// Resolve a URI the peer mapped for us.
    pub async fn get_by_uri(&self, uri: &str) -> NetResult<Option<ObjectHandle>> {
        let uuid = self.lock().remote_uris.get(uri).copied();
        match uuid {
            Some(uuid) => Ok(Some(
                self.core.registry().get_by_uuid_no_wait(uuid, false).await?,
            )),
            None => Ok(None),
        }
    }

    /// Push a published object and its URI mapping to the peer.
    pub async fn push_uri(&self, uri: &str, object: &ObjectHandle) -> NetResult<()> {
        self.put(object).await?;
        self.queue(PacketBody::SendUriMapping {
            uri: uri.to_string(),
            uuid: object.uuid(),
        });
        self.flush_outgoing().await
    }

    /// Close immediately: tell the peer, drop whatever is still queued, and
    /// reject every pending call with [`NetError::Aborted`].
    pub async fn close(&self) {
        if self.is_shut_down() {
            return;
        }
        if self.state() != ChannelState::Closed {
            let dropped = std::mem::take(&mut self.lock().outgoing);
            reject(dropped.into_iter().filter_map(|o| o.reply));
            let _guard = self.flush_lock.lock().await;
            let packet = Packet {
                packet_id: Some(self.next_packet_id()),
                origin_packet_id: None,
                body: PacketBody::Close,
            };
            if let Err(e) = self.transport.send(vec![packet]).await {
                debug!(channel = %self.core.id(), error = %e, "could not announce close");
            }
        }
        self.shutdown("closed locally").await;
    }

    /// Flush everything pending, then close.
    pub async fn graceful_close(&self) -> NetResult<()> {
        let flushed = self.flush_outgoing().await;
        self.close().await;
        flushed
    }

    /// Resolves once the channel has been closed, locally, by the peer, or
    /// by losing the connection.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| *s == ChannelState::Closed && self.is_shut_down())
            .await;
    }

    pub(crate) async fn shutdown(&self, reason: &str) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let (pending, queued) = {
            let mut state = self.lock();
            state.change_stores.clear();
            (
                std::mem::take(&mut state.pending_calls),
                std::mem::take(&mut state.outgoing),
            )
        };
        self.state.send_replace(ChannelState::Closed);
        let aborted = pending.len();
        reject(
            pending
                .into_values()
                .chain(queued.into_iter().filter_map(|o| o.reply)),
        );
        let released = self.shared.watcher.unwatch_subscriber(self.core.id());
        self.transport.close().await;
        info!(channel = %self.core.id(), reason, aborted, released, "channel closed");
    }

    pub(crate) fn next_packet_id(&self) -> u64 {
        let mut state = self.lock();
        state.last_packet_id += 1;
        state.last_packet_id
    }

    pub(crate) fn queue(&self, body: PacketBody) {
        self.push_outgoing(
            Outgoing {
                body,
                origin: None,
                reply: None,
            },
            false,
        );
    }

    pub(crate) fn queue_reply(&self, origin: u64, body: PacketBody) {
        self.push_outgoing(
            Outgoing {
                body,
                origin: Some(origin),
                reply: None,
            },
            false,
        );
    }

    /// Queue a packet that expects a `return`. The receiver fails with a
    /// closed-channel error when the call is dropped unanswered.
    pub(crate) fn queue_call(
        &self,
        body: PacketBody,
        front: bool,
    ) -> oneshot::Receiver<NetResult<Option<WireValue>>> {
        let (tx, rx) = oneshot::channel();
        self.push_outgoing(
            Outgoing {
                body,
                origin: None,
                reply: Some(tx),
            },
            front,
        );
        rx
    }

    fn push_outgoing(&self, outgoing: Outgoing, front: bool) {
        if self.is_shut_down() {
            trace!(channel = %self.core.id(), packet = outgoing.body.type_name(), "channel shut down, dropping packet");
            return;
        }
        let mut state = self.lock();
        if front {
            state.outgoing.push_front(outgoing);
        } else {
            state.outgoing.push_back(outgoing);
        }
    }

    /// Settle dependents, bundle pending changes, and hand the queue to the
    /// transport. Nothing leaves while the channel is closed.
    pub(crate) async fn flush_outgoing(&self) -> NetResult<()> {
        self.drain_dependents().await?;
        self.bundle_changes();
        if self.state() == ChannelState::Closed {
            return Ok(());
        }

        let _guard = self.flush_lock.lock().await;
        let (batch, calls) = self.take_batch();
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            channel = %self.core.id(),
            count = batch.len(),
            first = ?batch.first().and_then(|p| p.packet_id),
            "sending batch"
        );
        if let Err(e) = self.transport.send(batch).await {
            warn!(channel = %self.core.id(), error = %e, "batch not delivered");
            let failed: Vec<CallReply> = {
                let mut state = self.lock();
                calls
                    .iter()
                    .filter_map(|id| state.pending_calls.remove(id))
                    .collect()
            };
            for reply in failed {
                let _ = reply.send(Err(NetError::Disconnected));
            }
            return Err(e);
        }
        Ok(())
    }

    /// Take the outgoing queue, numbering packets in take order and
    /// registering call correlations.
    fn take_batch(&self) -> (Vec<Packet>, Vec<u64>) {
        let mut state = self.lock();
        let queued = std::mem::take(&mut state.outgoing);
        let mut batch = Vec::with_capacity(queued.len());
        let mut calls = Vec::new();
        for outgoing in queued {
            state.last_packet_id += 1;
            let id = state.last_packet_id;
            if let Some(reply) = outgoing.reply {
                state.pending_calls.insert(id, reply);
                calls.push(id);
            }
            batch.push(Packet {
                packet_id: Some(id),
                origin_packet_id: outgoing.origin,
                body: outgoing.body,
            });
        }
        (batch, calls)
    }

    /// Move pending change stores of objects the peer knows into one
    /// `sendPropertyChanges` packet.
    fn bundle_changes(&self) {
        let changes: BTreeMap<ObjectUuid, ChangeBundle> = {
            let mut state = self.lock();
            let stores = std::mem::take(&mut state.change_stores);
            let mut changes = BTreeMap::new();
            for (uuid, mut store) in stores {
                if store.is_empty() {
                    continue;
                }
                if state.send_states.contains_key(&uuid) {
                    changes.insert(uuid, store.take());
                } else {
                    debug!(uuid = %uuid, "peer does not know the object, dropping its changes");
                }
            }
            changes
        };
        if changes.is_empty() {
            return;
        }
        for uuid in changes.keys() {
            self.shared.watcher.clear_dirty_object(*uuid);
        }
        trace!(channel = %self.core.id(), objects = changes.len(), "bundling property changes");
        self.queue(PacketBody::SendPropertyChanges { changes });
    }

    /// Flush shortly after a watched change, collapsing bursts into one
    /// batch.
    fn schedule_flush(&self) {
        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.flush_scheduled.store(false, Ordering::Release);
            return;
        };
        let channel = self.self_ref.clone();
        let delay = self.config.flush_delay();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(channel) = channel.upgrade() else {
                return;
            };
            channel.flush_scheduled.store(false, Ordering::Release);
            if let Err(e) = channel.flush_outgoing().await {
                warn!(channel = %channel.core.id(), error = %e, "scheduled flush failed");
            }
        });
    }

    /// Record the peer on `open`. A different instance hash means the peer
    /// restarted and forgot everything we sent it.
    pub(crate) fn record_peer(&self, uuid: ObjectUuid, instance_hash: String) -> bool {
        let restarted = {
            let mut state = self.lock();
            let restarted = state
                .peer
                .as_ref()
                .is_some_and(|p| p.instance_hash != instance_hash);
            if restarted {
                state.send_states.clear();
                state.change_stores.clear();
                state.unbuilt.clear();
                state.remote_uris.clear();
            }
            state.peer = Some(PeerInfo {
                uuid,
                instance_hash,
            });
            restarted
        };
        if restarted {
            let released = self.shared.watcher.unwatch_subscriber(self.core.id());
            info!(channel = %self.core.id(), peer = %uuid, released, "peer restarted, send state reset");
        }
        self.state.send_if_modified(|s| {
            let changed = *s != ChannelState::Open;
            *s = ChannelState::Open;
            changed
        });
        restarted
    }

    /// Note an inbound document. Returns the previous send state.
    pub(crate) fn record_received(&self, uuid: ObjectUuid) -> Option<SendState> {
        let mut state = self.lock();
        let previous = state.send_states.get(&uuid).copied();
        if previous.is_none() {
            state.send_states.insert(uuid, SendState::Received);
        }
        previous
    }

    /// Keep a document whose object could not be built, so it can still be
    /// served by [`get_data_from_uuid`](ReplicationChannel::get_data_from_uuid).
    pub(crate) fn keep_unbuilt(&self, uuid: ObjectUuid, json: Json) {
        self.lock().unbuilt.insert(uuid, json);
    }

    pub(crate) fn forget_unbuilt(&self, uuid: ObjectUuid) {
        self.lock().unbuilt.remove(&uuid);
    }

    pub(crate) fn map_remote_uri(&self, uri: String, uuid: ObjectUuid) {
        debug!(channel = %self.core.id(), %uri, uuid = %uuid, "peer mapped uri");
        self.lock().remote_uris.insert(uri, uuid);
    }

    pub(crate) fn take_pending_call(&self, origin: u64) -> Option<CallReply> {
        self.lock().pending_calls.remove(&origin)
    }

    /// Watch an object on behalf of this channel.
    pub(crate) fn watch(&self, object: &ObjectHandle) {
        let Some(channel) = self.self_ref.upgrade() else {
            return;
        };
        let subscriber: Arc<dyn WatchSubscriber> = channel;
        if let Err(e) = self.shared.watcher.watch_object(object, &subscriber) {
            warn!(uuid = %object.uuid(), error = %e, "could not watch object");
        }
    }

    /// Associate a peer-owned object with this channel.
    pub(crate) fn adopt(&self, object: &ObjectHandle) {
        let forwarder: Weak<dyn MethodForwarder> = self.self_ref.clone();
        if let Err(e) = object.attach_endpoint(EndpointLink::new(self.core.id(), forwarder)) {
            warn!(uuid = %object.uuid(), error = %e, "object already belongs to another channel");
        }
    }

    pub(crate) fn strong(&self) -> Option<Arc<NetworkChannel>> {
        self.self_ref.upgrade()
    }
}

fn reject(replies: impl IntoIterator<Item = CallReply>) {
    for reply in replies {
        let _ = reply.send(Err(NetError::Aborted));
    }
}

async fn run_inbound(channel: Weak<NetworkChannel>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(message) = inbound.recv().await {
        let Some(channel) = channel.upgrade() else {
            break;
        };
        match message {
            Inbound::Batch(batch) => {
                for packet in batch {
                    channel.handle_packet(packet).await;
                }
            }
            Inbound::Disconnected => channel.shutdown("connection lost").await,
        }
    }
}

#[async_trait]
impl SerialContext for NetworkChannel {
    fn registry(&self) -> &Arc<IdentityRegistry> {
        self.core.registry()
    }

    fn serializers(&self) -> &Arc<SerializerCache> {
        self.core.serializers()
    }

    fn put_dependent_object(&self, object: &ObjectHandle) {
        if self.needs_send(object) {
            self.core.queue_dependent(object);
        }
    }

    /// Objects the peer has not sent yet resolve to placeholders, filled in
    /// when their `sendObject` arrives.
    async fn resolve_reference(
        &self,
        uuid: ObjectUuid,
        class: Option<&str>,
    ) -> SerialResult<Option<ObjectHandle>> {
        let registry = self.core.registry();
        if let Some(object) = registry.try_get_incomplete(uuid) {
            return Ok(Some(object));
        }
        if registry.status(uuid) == Some(LoadState::Loading) {
            return Ok(Some(registry.get_by_uuid_no_wait(uuid, true).await?));
        }
        match class {
            Some(class) => {
                trace!(uuid = %uuid, class, "creating placeholder for forward reference");
                Ok(Some(registry.obtain_object(class, uuid)?))
            }
            None => Ok(None),
        }
    }

    fn begin_changing_property(&self, uuid: ObjectUuid, index: usize) {
        self.core.begin_changing(uuid, index);
    }

    fn end_changing_property(&self, uuid: ObjectUuid, index: usize) {
        self.core.end_changing(uuid, index);
    }

    fn is_changing_property(&self, uuid: ObjectUuid, index: usize) -> bool {
        self.core.is_changing(uuid, index)
    }
}

#[async_trait]
impl ReplicationChannel for NetworkChannel {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn as_context(&self) -> &dyn SerialContext {
        self
    }

    fn is_object_sent(&self, uuid: ObjectUuid) -> bool {
        self.lock().send_states.contains_key(&uuid)
    }

    /// Queue a `sendObject` the first time an object is put; later puts of
    /// an object the peer knows are no-ops.
    async fn send_json(&self, object: &ObjectHandle, json: Json) -> ChannelResult<()> {
        let uuid = object.uuid();
        {
            let mut state = self.lock();
            if let Some(known) = state.send_states.get(&uuid) {
                trace!(uuid = %uuid, state = ?known, "peer already knows the object");
                return Ok(());
            }
            state.send_states.insert(uuid, SendState::Sent);
        }
        self.queue(PacketBody::SendObject { uuid, json });
        self.watch(object);
        Ok(())
    }

    /// Objects shared with the peer are served from their live instance, so
    /// applied property changes are reflected.
    async fn get_data_from_uuid(&self, uuid: ObjectUuid) -> ChannelResult<Option<ObjectData>> {
        let json = {
            let state = self.lock();
            if !state.send_states.contains_key(&uuid) {
                return Ok(None);
            }
            state.unbuilt.get(&uuid).cloned()
        };
        let json = match json {
            Some(json) => json,
            None => {
                let Some(object) = self.core.registry().try_get_incomplete(uuid) else {
                    return Ok(None);
                };
                let ctx = LocalContext::new(
                    Arc::clone(self.core.registry()),
                    Arc::clone(self.core.serializers()),
                );
                self.core
                    .serializers()
                    .for_object(&object)
                    .to_json(&ctx, &object, None)?
            }
        };
        Ok(Some(ObjectData {
            json,
            mtime: None,
            is_stale: false,
        }))
    }

    async fn flush(&self) -> ChannelResult<()> {
        Ok(self.flush_outgoing().await?)
    }
}

impl WatchSubscriber for NetworkChannel {
    fn as_context(&self) -> &dyn SerialContext {
        self
    }

    fn subscriber_id(&self) -> ObjectUuid {
        self.core.id()
    }

    fn property_changed(&self, object: &ObjectHandle, prop: &PropertyDescriptor, record: ChangeRecord) {
        let uuid = object.uuid();
        {
            let mut state = self.lock();
            if !state.send_states.contains_key(&uuid) {
                trace!(uuid = %uuid, property = prop.name(), "peer does not know the object, ignoring change");
                return;
            }
            state
                .change_stores
                .entry(uuid)
                .or_insert_with(ChangeStore::new)
                .store_change(prop.name(), record);
        }
        self.schedule_flush();
    }
}

impl MethodForwarder for NetworkChannel {
    fn forward(&self, target: ObjectHandle, method: String, args: Vec<Value>) -> MethodFuture {
        let channel = self.strong();
        Box::pin(async move {
            let Some(channel) = channel else {
                return Err(MethodError::ChannelClosed);
            };
            channel
                .call_remote_method(target.uuid(), &method, args)
                .await
                .map_err(MethodError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use tether_channel::ChannelConfig;
    use tether_model::{ClassRegistry, PropertyDescriptor, TypeBuilder, ValueShape};
    use tether_types::fields;

    fn channel() -> (Arc<NetworkChannel>, Arc<IdentityRegistry>, LoopbackTransport) {
        let classes = Arc::new(ClassRegistry::new());
        classes
            .register(
                TypeBuilder::new("Note")
                    .property(PropertyDescriptor::new("name", ValueShape::text()).persistent()),
            )
            .unwrap();
        let registry = IdentityRegistry::new(Arc::clone(&classes));
        let serializers = Arc::new(SerializerCache::new(classes));
        let shared = NetworkShared {
            registry: Arc::clone(&registry),
            watcher: Arc::new(FanoutChangeWatcher::new(Arc::clone(&serializers))),
            serializers,
            uris: Arc::new(UriDirectory::new()),
            instance_hash: "local".into(),
        };
        let (local, remote) = LoopbackTransport::pair();
        let channel = NetworkChannel::new(
            shared,
            Arc::new(local),
            ChannelConfig::default(),
            NetworkConfig::server(),
        );
        (channel, registry, remote)
    }

    fn open_packet(peer: ObjectUuid, hash: &str) -> Packet {
        Packet {
            packet_id: Some(1),
            origin_packet_id: None,
            body: PacketBody::Open {
                uuid: peer,
                instance_hash: hash.into(),
            },
        }
    }

    #[tokio::test]
    async fn peer_restart_resets_send_state() {
        let (channel, registry, _remote) = channel();
        let peer = ObjectUuid::new();
        channel.handle_packet(open_packet(peer, "first")).await;
        assert!(channel.is_open());
        assert_eq!(channel.peer_id(), Some(peer));

        let note = registry.new_object("Note").unwrap();
        channel.put(&note).await.unwrap();
        assert_eq!(channel.send_state(note.uuid()), Some(SendState::Sent));
        assert!(channel.shared.watcher.is_watching(note.uuid()));

        channel.handle_packet(open_packet(peer, "first")).await;
        assert_eq!(channel.send_state(note.uuid()), Some(SendState::Sent));

        channel.handle_packet(open_packet(peer, "second")).await;
        assert_eq!(channel.send_state(note.uuid()), None);
        assert!(!channel.shared.watcher.is_watching(note.uuid()));
    }

    fn send_object(json: Json) -> Packet {
        Packet {
            packet_id: Some(2),
            origin_packet_id: None,
            body: PacketBody::SendObject {
                uuid: fields::uuid_of(&json).unwrap(),
                json,
            },
        }
    }

    #[tokio::test]
    async fn unbuildable_documents_are_kept_as_data() {
        let (channel, registry, _remote) = channel();
        channel.handle_packet(open_packet(ObjectUuid::new(), "peer")).await;

        let ghost = ObjectUuid::new();
        let doc = serde_json::json!({"_classname": "Ghost", "_uuid": ghost.to_string(), "x": 1});
        channel.handle_packet(send_object(doc.clone())).await;
        assert!(registry.try_get(ghost).is_none());
        assert_eq!(channel.get_data_from_uuid(ghost).await.unwrap().unwrap().json, doc);

        let note = ObjectUuid::new();
        channel
            .handle_packet(send_object(
                serde_json::json!({"_classname": "Note", "_uuid": note.to_string(), "name": "a"}),
            ))
            .await;
        let mirror = registry.try_get(note).unwrap();
        mirror.set("name", "b").unwrap();
        let data = channel.get_data_from_uuid(note).await.unwrap().unwrap();
        assert_eq!(data.json["name"], serde_json::json!("b"));
        assert!(channel.lock().unbuilt.get(&note).is_none());
    }

    #[tokio::test]
    async fn packets_queued_while_closed_wait_for_the_session() {
        let (channel, registry, _remote) = channel();
        let note = registry.new_object("Note").unwrap();
        channel.put(&note).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.lock().outgoing.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_queued_calls() {
        let (channel, _registry, _remote) = channel();
        let reply = channel.queue_call(PacketBody::Close, false);
        channel.shutdown("test").await;
        assert!(matches!(reply.await, Ok(Err(NetError::Aborted))));
        assert!(channel.is_shut_down());
        channel.closed().await;
    }
}
