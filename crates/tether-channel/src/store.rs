use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as Json;
use tether_model::{ObjectHandle, PropertyDescriptor};
use tether_registry::{IdentityRegistry, ObjectLoader, RegistryError, RegistryResult};
use tether_serial::{SerialContext, SerialError, SerialResult, SerializerCache};
use tether_store::{BackingStore, Projection, Query};
use tether_types::{fields, ChangeRecord, ObjectUuid, CLASSNAME_FIELD, MTIME_FIELD};
use tether_watch::{ChangeWatcher, WatchSubscriber};
use tracing::{debug, info, warn};

use crate::channel::{ObjectData, ReplicationChannel};
use crate::config::ChannelConfig;
use crate::endpoint::EndpointCore;
use crate::error::ChannelResult;

/// Replication channel backed by a document store.
///
/// Saved documents are stamped with `_mtime`. The channel loads objects for
/// the registry, tracks the stamp of every object it saved or loaded, and
/// reports an object stale when the store holds a different stamp. Saved
/// and loaded objects stay watched, so later mutations mark them dirty and
/// [`flush`](ReplicationChannel::flush) re-saves them.
pub struct StoreChannel {
    core: EndpointCore,
    store: Arc<dyn BackingStore>,
    watcher: ChangeWatcher,
    mtimes: Mutex<HashMap<ObjectUuid, i64>>,
    self_ref: Weak<StoreChannel>,
}

impl StoreChannel {
    /// Create the channel and register it as a loader with the registry.
    pub fn new(
        registry: Arc<IdentityRegistry>,
        serializers: Arc<SerializerCache>,
        store: Arc<dyn BackingStore>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let channel = Arc::new_cyclic(|self_ref| Self {
            core: EndpointCore::new(Arc::clone(&registry), Arc::clone(&serializers), config),
            store,
            watcher: ChangeWatcher::new(serializers),
            mtimes: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        });
        let loader: Arc<dyn ObjectLoader> = channel.clone();
        registry.add_loader(&loader);
        info!(channel = %channel.core.id(), "store channel ready");
        channel
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    /// The `_mtime` this channel last saved or loaded for `uuid`.
    pub fn recorded_mtime(&self, uuid: ObjectUuid) -> Option<i64> {
        self.mtimes.lock().expect("mtime lock poisoned").get(&uuid).copied()
    }

    /// Delete an object's document. The live object is left alone but no
    /// longer watched.
    pub async fn remove(&self, object: &ObjectHandle) -> ChannelResult<bool> {
        let uuid = object.uuid();
        let removed = self.store.find_and_remove(&Query::by_uuid(uuid))?.is_some();
        self.watcher.unwatch_object(uuid, self.core.id());
        self.mtimes.lock().expect("mtime lock poisoned").remove(&uuid);
        debug!(uuid = %uuid, removed, "removed document");
        Ok(removed)
    }

    fn next_mtime(&self, uuid: ObjectUuid) -> i64 {
        let now = Utc::now().timestamp_millis();
        match self.recorded_mtime(uuid) {
            Some(previous) => now.max(previous + 1),
            None => now,
        }
    }

    fn stored_mtime(&self, uuid: ObjectUuid) -> ChannelResult<Option<i64>> {
        let projection = Projection::fields([MTIME_FIELD]);
        let doc = self.store.find_one(&Query::by_uuid(uuid), Some(&projection))?;
        Ok(doc.as_ref().and_then(fields::mtime_of))
    }

    fn is_stale(&self, object: &ObjectHandle) -> bool {
        let uuid = object.uuid();
        match self.stored_mtime(uuid) {
            Ok(Some(stored)) => self.recorded_mtime(uuid) != Some(stored),
            Ok(None) => false,
            Err(e) => {
                warn!(uuid = %uuid, error = %e, "staleness check failed");
                false
            }
        }
    }

    /// Remember the stamp of a saved or loaded object, watch it, and let
    /// the registry ask whether it went stale.
    fn track(&self, object: &ObjectHandle, mtime: Option<i64>) {
        let uuid = object.uuid();
        if let Some(mtime) = mtime {
            self.mtimes.lock().expect("mtime lock poisoned").insert(uuid, mtime);
        }
        let Some(channel) = self.self_ref.upgrade() else {
            return;
        };
        let subscriber: Arc<dyn WatchSubscriber> = channel;
        if let Err(e) = self.watcher.watch_object(object, &subscriber) {
            warn!(uuid = %uuid, error = %e, "could not watch object");
        }
        let weak = self.self_ref.clone();
        let installed = self.core.registry().set_stale_check(
            uuid,
            Arc::new(move |object: &ObjectHandle| {
                weak.upgrade().is_some_and(|channel| channel.is_stale(object))
            }),
        );
        if !installed {
            debug!(uuid = %uuid, "object not registered, no staleness check");
        }
    }
}

#[async_trait]
impl SerialContext for StoreChannel {
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

    async fn resolve_query(&self, query: &Json) -> SerialResult<Option<ObjectHandle>> {
        let query = match Query::from_json(query) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "unusable query reference");
                return Ok(None);
            }
        };
        let projection = Projection::fields([CLASSNAME_FIELD]);
        let doc = match self.store.find_one(&query, Some(&projection)) {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "query reference lookup failed");
                return Ok(None);
            }
        };
        let uuid = fields::uuid_of(&doc).map_err(SerialError::from)?;
        Ok(Some(self.core.registry().get_by_uuid_no_wait(uuid, true).await?))
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
impl ReplicationChannel for StoreChannel {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn as_context(&self) -> &dyn SerialContext {
        self
    }

    fn is_object_sent(&self, uuid: ObjectUuid) -> bool {
        self.mtimes.lock().expect("mtime lock poisoned").contains_key(&uuid)
    }

    fn needs_send(&self, object: &ObjectHandle) -> bool {
        !self.is_object_sent(object.uuid()) || self.watcher.is_dirty(object.uuid())
    }

    async fn send_json(&self, object: &ObjectHandle, json: Json) -> ChannelResult<()> {
        let uuid = object.uuid();
        let mtime = self.next_mtime(uuid);
        let mut json = json;
        if let Some(map) = json.as_object_mut() {
            map.insert(MTIME_FIELD.into(), Json::from(mtime));
        }
        self.store.put(json)?;
        self.track(object, Some(mtime));
        self.watcher.clear_dirty_object(uuid);
        debug!(uuid = %uuid, class = object.class_name(), mtime, "saved document");
        Ok(())
    }

    async fn get_data_from_uuid(&self, uuid: ObjectUuid) -> ChannelResult<Option<ObjectData>> {
        let Some(json) = self.store.find_one(&Query::by_uuid(uuid), None)? else {
            return Ok(None);
        };
        let mtime = fields::mtime_of(&json);
        let is_stale = match (self.recorded_mtime(uuid), mtime) {
            (Some(recorded), Some(stored)) => recorded != stored,
            _ => false,
        };
        Ok(Some(ObjectData {
            json,
            mtime,
            is_stale,
        }))
    }

    /// Re-save every dirty object, then settle dependents.
    async fn flush(&self) -> ChannelResult<()> {
        let dirty = self.watcher.take_dirty();
        if !dirty.is_empty() {
            debug!(channel = %self.core.id(), count = dirty.len(), "re-saving dirty objects");
        }
        for object in dirty {
            self.put_object(&object).await?;
        }
        self.drain_dependents().await
    }
}

#[async_trait]
impl ObjectLoader for StoreChannel {
    async fn load_object(&self, uuid: ObjectUuid) -> RegistryResult<Option<ObjectHandle>> {
        let loaded = self
            .materialize(uuid)
            .await
            .map_err(|e| RegistryError::Loader(e.to_string()))?;
        Ok(loaded.map(|(object, data)| {
            self.track(&object, data.mtime);
            object
        }))
    }
}

impl WatchSubscriber for StoreChannel {
    fn as_context(&self) -> &dyn SerialContext {
        self
    }

    fn subscriber_id(&self) -> ObjectUuid {
        self.core.id()
    }

    fn property_changed(&self, object: &ObjectHandle, prop: &PropertyDescriptor, record: ChangeRecord) {
        debug!(
            uuid = %object.uuid(),
            property = prop.name(),
            change = record.type_name(),
            "object changed since last save"
        );
    }
}
