use std::sync::Arc;

use tether_model::ObjectHandle;
use tether_serial::SerializerCache;
use tether_types::ObjectUuid;

use crate::error::WatchResult;
use crate::shared::WatcherCore;
use crate::status::{StatusSource, WatcherStatus};
use crate::subscriber::WatchSubscriber;

/// Watcher serving exactly one subscriber.
///
/// Watching an object already watched by a different subscriber fails with
/// [`WatchError::SubscriberConflict`](crate::WatchError::SubscriberConflict).
/// Watching it again from the same subscriber is a no-op.
pub struct ChangeWatcher {
    core: WatcherCore,
}

impl ChangeWatcher {
    pub fn new(serializers: Arc<SerializerCache>) -> Self {
        Self {
            core: WatcherCore::new(serializers, true),
        }
    }

    pub fn watch_object(
        &self,
        object: &ObjectHandle,
        subscriber: &Arc<dyn WatchSubscriber>,
    ) -> WatchResult<()> {
        self.core.watch_object(object, subscriber)
    }

    pub fn unwatch_object(&self, uuid: ObjectUuid, subscriber: ObjectUuid) -> bool {
        self.core.unwatch_object(uuid, subscriber)
    }

    pub fn is_watching(&self, uuid: ObjectUuid) -> bool {
        self.core.is_watching(uuid)
    }

    pub fn watched_count(&self) -> usize {
        self.core.watched_count()
    }

    pub fn is_dirty(&self, uuid: ObjectUuid) -> bool {
        self.core.is_dirty(uuid)
    }

    pub fn take_dirty(&self) -> Vec<ObjectHandle> {
        self.core.take_dirty()
    }

    pub fn clear_dirty(&self) {
        self.core.clear_dirty()
    }

    pub fn clear_dirty_object(&self, uuid: ObjectUuid) -> bool {
        self.core.clear_dirty_object(uuid)
    }
}

impl StatusSource for ChangeWatcher {
    fn status(&self) -> WatcherStatus {
        self.core.status()
    }
}

/// Watcher shared by many subscribers.
///
/// Each (object, subscriber) pair is reference counted: an object stays
/// watched until every subscriber has unwatched it as often as it watched
/// it.
pub struct FanoutChangeWatcher {
    core: WatcherCore,
}

impl FanoutChangeWatcher {
    pub fn new(serializers: Arc<SerializerCache>) -> Self {
        Self {
            core: WatcherCore::new(serializers, false),
        }
    }

    pub fn watch_object(
        &self,
        object: &ObjectHandle,
        subscriber: &Arc<dyn WatchSubscriber>,
    ) -> WatchResult<()> {
        self.core.watch_object(object, subscriber)
    }

    pub fn unwatch_object(&self, uuid: ObjectUuid, subscriber: ObjectUuid) -> bool {
        self.core.unwatch_object(uuid, subscriber)
    }

    /// Drop every watch held by a subscriber, typically a closing channel.
    /// Returns the number of objects no longer watched by anyone.
    pub fn unwatch_subscriber(&self, subscriber: ObjectUuid) -> usize {
        self.core.unwatch_subscriber(subscriber)
    }

    pub fn is_watching(&self, uuid: ObjectUuid) -> bool {
        self.core.is_watching(uuid)
    }

    pub fn watched_count(&self) -> usize {
        self.core.watched_count()
    }

    pub fn is_dirty(&self, uuid: ObjectUuid) -> bool {
        self.core.is_dirty(uuid)
    }

    pub fn take_dirty(&self) -> Vec<ObjectHandle> {
        self.core.take_dirty()
    }

    pub fn clear_dirty(&self) {
        self.core.clear_dirty()
    }

    pub fn clear_dirty_object(&self, uuid: ObjectUuid) -> bool {
        self.core.clear_dirty_object(uuid)
    }
}

impl StatusSource for FanoutChangeWatcher {
    fn status(&self) -> WatcherStatus {
        self.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tether_model::{
        ClassRegistry, PropertyDescriptor, PropertyType, TypeBuilder, Value, ValueShape,
    };
    use tether_registry::IdentityRegistry;
    use tether_serial::{ChangingPropertyGuard, LocalContext, SerialContext};
    use tether_types::ChangeRecord;

    use crate::WatchError;

    struct Recorder {
        id: ObjectUuid,
        ctx: LocalContext,
        records: Mutex<Vec<(String, ChangeRecord)>>,
    }

    #[async_trait]
    impl SerialContext for Recorder {
        fn registry(&self) -> &Arc<IdentityRegistry> {
            self.ctx.registry()
        }

        fn serializers(&self) -> &Arc<SerializerCache> {
            self.ctx.serializers()
        }

        fn put_dependent_object(&self, object: &ObjectHandle) {
            self.ctx.put_dependent_object(object)
        }

        fn begin_changing_property(&self, uuid: ObjectUuid, index: usize) {
            self.ctx.begin_changing_property(uuid, index)
        }

        fn end_changing_property(&self, uuid: ObjectUuid, index: usize) {
            self.ctx.end_changing_property(uuid, index)
        }

        fn is_changing_property(&self, uuid: ObjectUuid, index: usize) -> bool {
            self.ctx.is_changing_property(uuid, index)
        }
    }

    impl WatchSubscriber for Recorder {
        fn as_context(&self) -> &dyn SerialContext {
            self
        }

        fn subscriber_id(&self) -> ObjectUuid {
            self.id
        }

        fn property_changed(&self, _: &ObjectHandle, prop: &PropertyDescriptor, record: ChangeRecord) {
            self.records
                .lock()
                .unwrap()
                .push((prop.name().to_string(), record));
        }
    }

    struct Setup {
        registry: Arc<IdentityRegistry>,
        serializers: Arc<SerializerCache>,
    }

    fn setup() -> Setup {
        let classes = Arc::new(ClassRegistry::new());
        classes
            .register(
                TypeBuilder::new("Doc")
                    .property(PropertyDescriptor::new("title", ValueShape::text()).persistent())
                    .property(
                        PropertyDescriptor::new("items", PropertyType::list(ValueShape::any()))
                            .persistent(),
                    )
                    .property(PropertyDescriptor::new("scratch", ValueShape::any())),
            )
            .unwrap();
        Setup {
            registry: IdentityRegistry::new(Arc::clone(&classes)),
            serializers: Arc::new(SerializerCache::new(classes)),
        }
    }

    fn recorder(setup: &Setup) -> Arc<Recorder> {
        Arc::new(Recorder {
            id: ObjectUuid::new(),
            ctx: LocalContext::new(Arc::clone(&setup.registry), Arc::clone(&setup.serializers)),
            records: Mutex::new(Vec::new()),
        })
    }

    fn as_subscriber(r: &Arc<Recorder>) -> Arc<dyn WatchSubscriber> {
        Arc::clone(r) as Arc<dyn WatchSubscriber>
    }

    // ---- Single subscriber ----

    #[test]
    fn changes_are_serialized_and_mark_dirty() {
        let setup = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let sub = recorder(&setup);
        watcher.watch_object(&doc, &as_subscriber(&sub)).unwrap();

        doc.set("title", "hello").unwrap();
        doc.set("scratch", 1i64).unwrap();

        let records = sub.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "title");
        assert_eq!(
            records[0].1,
            ChangeRecord::SetValue {
                value: serde_json::json!("hello")
            }
        );
        assert!(watcher.is_dirty(doc.uuid()));
        let status = watcher.status();
        assert_eq!(status.num_watched_objects, 1);
        assert_eq!(status.dirty, vec![doc.uuid()]);
    }

    #[test]
    fn second_subscriber_is_rejected() {
        let setup = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let (a, b) = (recorder(&setup), recorder(&setup));
        watcher.watch_object(&doc, &as_subscriber(&a)).unwrap();
        watcher.watch_object(&doc, &as_subscriber(&a)).unwrap();
        let err = watcher.watch_object(&doc, &as_subscriber(&b)).unwrap_err();
        assert!(matches!(err, WatchError::SubscriberConflict { existing, .. } if existing == a.id));

        assert!(watcher.unwatch_object(doc.uuid(), a.id));
        assert!(!watcher.is_watching(doc.uuid()));
        assert_eq!(doc.property_listener_count(), 0);
    }

    #[test]
    fn own_writes_are_not_echoed_or_dirty() {
        let setup = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let sub = recorder(&setup);
        watcher.watch_object(&doc, &as_subscriber(&sub)).unwrap();

        let index = doc.descriptor().property("title").unwrap().index();
        {
            let _guard = ChangingPropertyGuard::new(sub.as_context(), doc.uuid(), index);
            doc.set("title", "from peer").unwrap();
        }
        assert!(sub.records.lock().unwrap().is_empty());
        assert!(!watcher.is_dirty(doc.uuid()));
    }

    #[test]
    fn take_dirty_drains() {
        let setup = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let sub = recorder(&setup);
        watcher.watch_object(&doc, &as_subscriber(&sub)).unwrap();
        doc.list("items").unwrap().push(Value::Integer(1));

        let dirty = watcher.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].ptr_eq(&doc));
        assert!(watcher.take_dirty().is_empty());

        doc.set("title", "x").unwrap();
        assert!(watcher.clear_dirty_object(doc.uuid()));
        assert_eq!(watcher.status().num_dirty_objects, 0);
    }

    // ---- Fanout ----

    #[test]
    fn fanout_delivers_to_every_subscriber_except_the_applier() {
        let setup = setup();
        let watcher = FanoutChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let (a, b) = (recorder(&setup), recorder(&setup));
        watcher.watch_object(&doc, &as_subscriber(&a)).unwrap();
        watcher.watch_object(&doc, &as_subscriber(&b)).unwrap();

        let index = doc.descriptor().property("title").unwrap().index();
        {
            let _guard = ChangingPropertyGuard::new(a.as_context(), doc.uuid(), index);
            doc.set("title", "from a's peer").unwrap();
        }
        assert!(a.records.lock().unwrap().is_empty());
        assert_eq!(b.records.lock().unwrap().len(), 1);
        assert!(watcher.is_dirty(doc.uuid()));
    }

    #[test]
    fn fanout_reference_counts_each_subscriber() {
        let setup = setup();
        let watcher = FanoutChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let (a, b) = (recorder(&setup), recorder(&setup));
        watcher.watch_object(&doc, &as_subscriber(&a)).unwrap();
        watcher.watch_object(&doc, &as_subscriber(&a)).unwrap();
        watcher.watch_object(&doc, &as_subscriber(&b)).unwrap();

        assert!(!watcher.unwatch_object(doc.uuid(), a.id));
        assert!(!watcher.unwatch_object(doc.uuid(), a.id));
        assert!(watcher.is_watching(doc.uuid()));
        assert_eq!(watcher.unwatch_subscriber(b.id), 1);
        assert!(!watcher.is_watching(doc.uuid()));
        assert_eq!(watcher.watched_count(), 0);
    }

    #[test]
    fn dropped_subscribers_are_skipped() {
        let setup = setup();
        let watcher = FanoutChangeWatcher::new(Arc::clone(&setup.serializers));
        let doc = setup.registry.new_object("Doc").unwrap();
        let sub = recorder(&setup);
        watcher.watch_object(&doc, &as_subscriber(&sub)).unwrap();
        drop(sub);

        doc.set("title", "nobody listens").unwrap();
        assert!(!watcher.is_dirty(doc.uuid()));
    }
}
