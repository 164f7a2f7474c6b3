use std::collections::BTreeMap;

use serde_json::Value as Json;
use tether_model::MethodError;
use tether_serial::{restore_changes, SerialContext};
use tether_types::{fields, ChangeBundle, ObjectUuid};
use tracing::{debug, trace, warn};

use crate::channel::NetworkChannel;
use crate::config::Role;
use crate::error::{NetError, NetResult};
use crate::packet::{Packet, PacketBody, UploadChunk, WireValue};

impl NetworkChannel {
    /// Apply one inbound packet. Packets are handled one at a time, in
    /// arrival order; method invocations run on their own tasks so a slow
    /// method does not hold up the session.
    pub(crate) async fn handle_packet(&self, packet: Packet) {
        trace!(
            channel = %self.id(),
            packet = packet.body.type_name(),
            id = ?packet.packet_id,
            "packet received"
        );
        let Packet {
            packet_id,
            origin_packet_id,
            body,
        } = packet;
        match body {
            PacketBody::Open {
                uuid,
                instance_hash,
            } => self.on_open(packet_id, uuid, instance_hash).await,
            PacketBody::Close => self.shutdown("closed by peer").await,
            PacketBody::SendObject { uuid, json } => self.on_send_object(uuid, json).await,
            PacketBody::SendPropertyChanges { changes } => self.on_property_changes(changes).await,
            PacketBody::SendUriMapping { uri, uuid } => self.map_remote_uri(uri, uuid),
            PacketBody::CallMethod {
                uuid,
                method_name,
                args,
            } => self.on_call(packet_id, uuid, method_name, args).await,
            PacketBody::Return { result, error } => self.on_return(origin_packet_id, result, error),
            PacketBody::Upload(chunk) => self.on_upload(packet_id, chunk).await,
        }
    }

    async fn on_open(&self, origin: Option<u64>, peer: ObjectUuid, instance_hash: String) {
        self.record_peer(peer, instance_hash);
        if self.role() == Role::Server {
            for (uri, object) in self.shared().uris.entries() {
                if let Err(e) = self.push_uri(&uri, &object).await {
                    warn!(channel = %self.id(), %uri, error = %e, "could not push published object");
                }
            }
        }
        self.reply(origin, Ok(None)).await;
    }

    async fn on_send_object(&self, uuid: ObjectUuid, json: Json) {
        let previous = self.record_received(uuid);
        if previous.is_some() {
            warn!(channel = %self.id(), uuid = %uuid, state = ?previous, "object sent again, refreshing");
        }
        let registry = self.core_ref().registry();
        let Some(class) = fields::classname_of(&json) else {
            warn!(channel = %self.id(), uuid = %uuid, "object without a class, keeping data only");
            self.keep_unbuilt(uuid, json.clone());
            return;
        };
        if !registry.classes().contains(class) {
            warn!(channel = %self.id(), uuid = %uuid, class, "unknown class, keeping data only");
            self.keep_unbuilt(uuid, json.clone());
            return;
        }

        let ctx: &dyn SerialContext = self;
        let object = match self.core_ref().serializers().from_json(ctx, &json, None).await {
            Ok(object) => object,
            Err(e) => {
                warn!(channel = %self.id(), uuid = %uuid, error = %e, "could not build received object, keeping data only");
                self.keep_unbuilt(uuid, json.clone());
                return;
            }
        };
        if let Err(e) = registry.set_object_complete(&object, None) {
            warn!(channel = %self.id(), uuid = %uuid, error = %e, "could not register received object");
            return;
        }
        self.forget_unbuilt(uuid);
        if previous.is_none() {
            self.adopt(&object);
            self.watch(&object);
        }
        debug!(channel = %self.id(), uuid = %uuid, class, "object received");
    }

    async fn on_property_changes(&self, changes: BTreeMap<ObjectUuid, ChangeBundle>) {
        let ctx: &dyn SerialContext = self;
        for (uuid, bundle) in changes {
            let Some(object) = self.core_ref().registry().try_get_incomplete(uuid) else {
                warn!(channel = %self.id(), uuid = %uuid, "changes for an unknown object, skipping");
                continue;
            };
            if let Err(e) = restore_changes(ctx, &object, &bundle).await {
                warn!(channel = %self.id(), uuid = %uuid, error = %e, "could not apply property changes");
            }
        }
    }

    /// Arguments resolve on the worker in arrival order; the body runs in
    /// its own task, so a slow call never holds back later packets or calls.
    async fn on_call(
        &self,
        origin: Option<u64>,
        uuid: ObjectUuid,
        method: String,
        args: Vec<WireValue>,
    ) {
        let Some(object) = self.core_ref().registry().try_get_incomplete(uuid) else {
            self.reply(origin, Err(NetError::UnknownObject(uuid))).await;
            return;
        };
        let class = object.class_name().to_string();
        match object.descriptor().method(&method) {
            None => {
                self.reply(origin, Err(MethodError::UnknownMethod { class, method }.into()))
                    .await;
                return;
            }
            Some(m) if !m.remote => {
                self.reply(origin, Err(MethodError::NotRemote { class, method }.into()))
                    .await;
                return;
            }
            Some(_) => {}
        }

        let args = args.iter().map(|arg| self.from_wire(arg)).collect();
        let Some(channel) = self.strong() else {
            return;
        };
        debug!(channel = %self.id(), uuid = %uuid, %method, "invoking remote call");
        tokio::spawn(async move {
            let outcome = match object.invoke_local(&method, args).await {
                Ok(value) => channel.to_wire(&value).await.map(Some),
                Err(e) => Err(NetError::Method(e)),
            };
            channel.reply(origin, outcome).await;
        });
    }

    fn on_return(&self, origin: Option<u64>, result: Option<WireValue>, error: Option<String>) {
        let Some(reply) = origin.and_then(|id| self.take_pending_call(id)) else {
            debug!(channel = %self.id(), origin = ?origin, "return for no pending call");
            return;
        };
        let outcome = match error {
            Some(message) => Err(NetError::Remote(message)),
            None => Ok(result),
        };
        let _ = reply.send(outcome);
    }

    async fn on_upload(&self, origin: Option<u64>, chunk: UploadChunk) {
        let outcome = match self.upload_handler() {
            Some(handler) => handler.on_chunk(chunk).await.map(|()| None),
            None => Err(NetError::Upload("no upload handler".into())),
        };
        self.reply(origin, outcome).await;
    }

    /// Answer a packet that expects a `return`.
    async fn reply(&self, origin: Option<u64>, outcome: NetResult<Option<WireValue>>) {
        let Some(origin) = origin else {
            warn!(channel = %self.id(), "packet expecting a return carried no id");
            return;
        };
        let body = match outcome {
            Ok(Some(result)) if result.is_raw() => PacketBody::Return {
                result: None,
                error: Some("result cannot leave the process".into()),
            },
            Ok(result) => PacketBody::Return {
                result,
                error: None,
            },
            Err(e) => PacketBody::Return {
                result: None,
                error: Some(e.to_string()),
            },
        };
        self.queue_reply(origin, body);
        if let Err(e) = self.flush_outgoing().await {
            warn!(channel = %self.id(), origin, error = %e, "could not send return");
        }
    }
}
