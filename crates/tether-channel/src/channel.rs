use async_trait::async_trait;
use serde_json::Value as Json;
use tether_model::ObjectHandle;
use tether_serial::SerialContext;
use tether_types::ObjectUuid;
use tracing::{debug, error};

use crate::endpoint::EndpointCore;
use crate::error::{ChannelError, ChannelResult};

/// A document fetched by identity from a channel's source.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectData {
    pub json: Json,
    /// Modification stamp, when the source keeps one.
    pub mtime: Option<i64>,
    /// The source holds a newer version than the one last loaded or saved.
    pub is_stale: bool,
}

/// Something objects can be saved through and loaded from.
///
/// Implementors supply transport-specific hooks; the put protocol
/// (reentrant put queue, dependent drain, bounded fixpoint, final flush) is
/// provided.
#[async_trait]
pub trait ReplicationChannel: SerialContext {
    fn core(&self) -> &EndpointCore;

    /// This channel as a plain serialization context.
    fn as_context(&self) -> &dyn SerialContext;

    /// Whether the channel has already sent `uuid` in this session.
    fn is_object_sent(&self, uuid: ObjectUuid) -> bool;

    /// Whether `object` has to go through `put_object` again.
    fn needs_send(&self, object: &ObjectHandle) -> bool {
        !self.is_object_sent(object.uuid())
    }

    /// Deliver a freshly serialized object.
    async fn send_json(&self, object: &ObjectHandle, json: Json) -> ChannelResult<()>;

    /// Look up the stored or shared document for an identity.
    async fn get_data_from_uuid(&self, uuid: ObjectUuid) -> ChannelResult<Option<ObjectData>>;

    /// Push everything pending. Must leave the dependent queue empty.
    async fn flush(&self) -> ChannelResult<()>;

    /// Save `object` and, before returning, every object it newly depends
    /// on.
    async fn put(&self, object: &ObjectHandle) -> ChannelResult<()> {
        self.grab_put_queue();
        let result = self.put_object(object).await;
        let released = self.release_put_queue().await;
        result.and(released)
    }

    fn grab_put_queue(&self) {
        self.core().grab();
    }

    /// Leave the put queue. The outermost release drains dependents and
    /// flushes.
    async fn release_put_queue(&self) -> ChannelResult<()> {
        if self.core().release() > 0 {
            return Ok(());
        }
        self.core().grab();
        let drained = self.drain_dependents().await;
        self.core().release();
        drained?;
        self.flush().await
    }

    /// Serialize and send one object, registering it as known.
    async fn put_object(&self, object: &ObjectHandle) -> ChannelResult<()> {
        let serializer = self.core().serializers().for_object(object);
        let json = serializer.to_json(self.as_context(), object, None)?;
        self.send_json(object, json).await?;
        self.core().registry().register_known(object)?;
        Ok(())
    }

    /// Save queued dependents until no new ones appear.
    async fn drain_dependents(&self) -> ChannelResult<()> {
        let max = self.core().config().max_put_passes;
        let mut passes = 0;
        while self.core().has_dependents() {
            passes += 1;
            if passes > max {
                let abandoned = self.core().take_dependents();
                error!(
                    channel = %self.core().id(),
                    max,
                    abandoned = abandoned.len(),
                    "dependent objects never settled"
                );
                return Err(ChannelError::TooManyPutPasses { max });
            }
            let batch = self.core().take_dependents();
            debug!(channel = %self.core().id(), pass = passes, count = batch.len(), "saving dependents");
            for object in batch {
                if self.needs_send(&object) {
                    self.put_object(&object).await?;
                }
            }
        }
        Ok(())
    }

    /// Build a live object from the channel's copy of `uuid`.
    async fn materialize(&self, uuid: ObjectUuid) -> ChannelResult<Option<(ObjectHandle, ObjectData)>> {
        let Some(data) = self.get_data_from_uuid(uuid).await? else {
            return Ok(None);
        };
        let object = self
            .core()
            .serializers()
            .from_json(self.as_context(), &data.json, None)
            .await?;
        Ok(Some((object, data)))
    }
}
