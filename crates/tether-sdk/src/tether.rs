use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tether_channel::{ReplicationChannel, StoreChannel};
use tether_model::{ClassRegistry, ObjectHandle};
use tether_net::{NetworkChannel, NetworkHub, Transport};
use tether_registry::IdentityRegistry;
use tether_serial::SerializerCache;
use tether_store::BackingStore;
use tether_types::ObjectUuid;
use tether_watch::{spawn_status_writer, StatusSource, WatcherStatus};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::TetherConfig;
use crate::error::{SdkError, SdkResult};

/// High-level Tether API.
///
/// Owns one identity registry and serializer cache, an optional storage
/// channel, and the network hub. Objects saved to the store and objects
/// shared with peers are the same live instances.
pub struct Tether {
    config: TetherConfig,
    classes: Arc<ClassRegistry>,
    registry: Arc<IdentityRegistry>,
    hub: NetworkHub,
    store: RwLock<Option<Arc<StoreChannel>>>,
}

impl Tether {
    pub fn new(classes: Arc<ClassRegistry>, config: TetherConfig) -> Self {
        let registry = IdentityRegistry::new(Arc::clone(&classes));
        let serializers = Arc::new(SerializerCache::new(Arc::clone(&classes)));
        let hub = NetworkHub::new(
            Arc::clone(&registry),
            serializers,
            config.channel.clone(),
            config.network.clone(),
        );
        Self {
            config,
            classes,
            registry,
            hub,
            store: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &NetworkHub {
        &self.hub
    }

    // ---- Storage ----

    /// Save through `store` from now on, and load unknown identities from
    /// it. Replaces any previously attached store.
    pub fn attach_store(&self, store: Arc<dyn BackingStore>) -> Arc<StoreChannel> {
        let channel = StoreChannel::new(
            Arc::clone(&self.registry),
            Arc::new(SerializerCache::new(Arc::clone(&self.classes))),
            store,
            self.config.channel.clone(),
        );
        let previous = self
            .store
            .write()
            .expect("store lock poisoned")
            .replace(Arc::clone(&channel));
        if previous.is_some() {
            warn!("replacing the attached store");
        }
        channel
    }

    pub fn store(&self) -> Option<Arc<StoreChannel>> {
        self.store.read().expect("store lock poisoned").clone()
    }

    fn require_store(&self) -> SdkResult<Arc<StoreChannel>> {
        self.store().ok_or(SdkError::NoStore)
    }

    /// Construct a new, complete object of `class`.
    pub fn new_object(&self, class: &str) -> SdkResult<ObjectHandle> {
        Ok(self.registry.new_object(class)?)
    }

    /// Save `object` and everything it newly references.
    pub async fn save(&self, object: &ObjectHandle) -> SdkResult<()> {
        self.require_store()?.put(object).await?;
        Ok(())
    }

    /// Load an object and wait until its graph has settled.
    pub async fn get(&self, uuid: ObjectUuid) -> SdkResult<ObjectHandle> {
        Ok(self.registry.get_by_uuid(uuid).await?)
    }

    /// Delete an object's stored document. Returns `false` if none existed.
    pub async fn remove(&self, object: &ObjectHandle) -> SdkResult<bool> {
        Ok(self.require_store()?.remove(object).await?)
    }

    // ---- Network ----

    pub fn connect(&self, transport: Arc<dyn Transport>) -> Arc<NetworkChannel> {
        self.hub.connect(transport)
    }

    pub async fn connect_tcp(&self, addr: &str) -> SdkResult<Arc<NetworkChannel>> {
        Ok(self.hub.connect_tcp(addr).await?)
    }

    pub async fn publish(&self, uri: &str, object: ObjectHandle) -> SdkResult<()> {
        Ok(self.hub.publish(uri, object).await?)
    }

    // ---- Lifecycle ----

    /// Start writing [`status`](StatusSource::status) to the configured
    /// status file. Returns `None` when no status file is configured.
    pub fn start_status_writer(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let path: PathBuf = self.config.watch.status_file.clone()?;
        let source: Arc<dyn StatusSource> = self.clone();
        info!(path = %path.display(), "writing watcher status");
        Some(spawn_status_writer(
            &source,
            path,
            self.config.watch.status_interval(),
        ))
    }

    /// Close every network channel, then re-save dirty stored objects.
    pub async fn shutdown(&self) -> SdkResult<()> {
        self.hub.close_all().await;
        if let Some(store) = self.store() {
            store.flush().await?;
        }
        info!("tether shut down");
        Ok(())
    }
}

/// Watched and dirty objects across the store and the network.
impl StatusSource for Tether {
    fn status(&self) -> WatcherStatus {
        let mut status = self.hub.watcher().status();
        if let Some(store) = self.store() {
            let stored = store.watcher().status();
            status.num_watched_objects += stored.num_watched_objects;
            for uuid in stored.dirty {
                if !status.dirty.contains(&uuid) {
                    status.dirty.push(uuid);
                }
            }
            status.num_dirty_objects = status.dirty.len();
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_model::{PropertyDescriptor, TypeBuilder, Value, ValueShape};
    use tether_net::LoopbackTransport;
    use tether_store::InMemoryBackingStore;

    fn classes() -> Arc<ClassRegistry> {
        let classes = Arc::new(ClassRegistry::new());
        classes
            .register(
                TypeBuilder::new("Task")
                    .property(PropertyDescriptor::new("title", ValueShape::text()).persistent())
                    .property(PropertyDescriptor::new("done", ValueShape::boolean()).persistent()),
            )
            .unwrap();
        classes
    }

    #[tokio::test]
    async fn save_needs_a_store() {
        let tether = Tether::new(classes(), TetherConfig::default());
        let task = tether.new_object("Task").unwrap();
        assert!(matches!(tether.save(&task).await, Err(SdkError::NoStore)));
    }

    #[tokio::test]
    async fn saved_objects_load_in_a_fresh_instance() {
        let store = Arc::new(InMemoryBackingStore::new());
        let first = Tether::new(classes(), TetherConfig::default());
        first.attach_store(store.clone());
        let task = first.new_object("Task").unwrap();
        task.set("title", "write docs").unwrap();
        first.save(&task).await.unwrap();

        let second = Tether::new(classes(), TetherConfig::default());
        second.attach_store(store);
        let loaded = second.get(task.uuid()).await.unwrap();
        assert_eq!(loaded.get("title").unwrap(), Value::from("write docs"));
        assert!(!loaded.ptr_eq(&task));
    }

    #[tokio::test]
    async fn shutdown_saves_dirty_objects_and_closes_channels() {
        let store = Arc::new(InMemoryBackingStore::new());
        let tether = Tether::new(classes(), TetherConfig::default());
        let channel = tether.attach_store(store.clone());
        let task = tether.new_object("Task").unwrap();
        tether.save(&task).await.unwrap();
        task.set("done", true).unwrap();
        assert_eq!(tether.status().num_dirty_objects, 1);

        let (near, _far) = LoopbackTransport::pair();
        let net = tether.connect(Arc::new(near));
        tether.shutdown().await.unwrap();

        assert!(net.is_shut_down());
        assert!(!channel.watcher().is_dirty(task.uuid()));
        let reloaded = Tether::new(classes(), TetherConfig::default());
        reloaded.attach_store(store);
        let copy = reloaded.get(task.uuid()).await.unwrap();
        assert_eq!(copy.get("done").unwrap(), Value::from(true));
    }

    #[tokio::test]
    async fn status_writer_follows_the_config() {
        assert!(Arc::new(Tether::new(classes(), TetherConfig::default()))
            .start_status_writer()
            .is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut config = TetherConfig::default();
        config.watch.status_file = Some(path.clone());
        let tether = Arc::new(Tether::new(classes(), config));
        let writer = tether.start_status_writer().unwrap();

        for _ in 0..200 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let written: WatcherStatus =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, WatcherStatus::default());
        writer.abort();
    }
}
