use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as Json;
use tether_model::ObjectHandle;
use tether_registry::IdentityRegistry;
use tether_types::ObjectUuid;

use crate::cache::SerializerCache;
use crate::error::SerialResult;

/// The party on whose behalf objects are converted.
///
/// Replication channels implement this. The context decides how references
/// are resolved and where dependent objects go, and it carries the
/// per-(object, property) counters used for echo suppression.
#[async_trait]
pub trait SerialContext: Send + Sync {
    fn registry(&self) -> &Arc<IdentityRegistry>;

    fn serializers(&self) -> &Arc<SerializerCache>;

    /// Called when serialization meets a reference that is not embedded.
    /// The context decides whether the object still needs sending.
    fn put_dependent_object(&self, object: &ObjectHandle);

    /// Resolve a `{"_query": ...}` reference. Contexts without a lookup
    /// collaborator resolve nothing.
    async fn resolve_query(&self, query: &Json) -> SerialResult<Option<ObjectHandle>> {
        let _ = query;
        Ok(None)
    }

    /// Resolve a reference by identity. The default waits for the registry,
    /// accepting objects that are still being populated so that reference
    /// cycles resolve to the same instance.
    async fn resolve_reference(
        &self,
        uuid: ObjectUuid,
        class: Option<&str>,
    ) -> SerialResult<Option<ObjectHandle>> {
        let _ = class;
        Ok(Some(self.registry().get_by_uuid_no_wait(uuid, true).await?))
    }

    fn begin_changing_property(&self, uuid: ObjectUuid, index: usize);

    fn end_changing_property(&self, uuid: ObjectUuid, index: usize);

    fn is_changing_property(&self, uuid: ObjectUuid, index: usize) -> bool;
}

/// Brackets the application of one property change: begins on creation,
/// ends on drop, so early returns cannot leave a counter raised.
pub struct ChangingPropertyGuard<'a> {
    ctx: &'a dyn SerialContext,
    uuid: ObjectUuid,
    index: usize,
}

impl<'a> ChangingPropertyGuard<'a> {
    pub fn new(ctx: &'a dyn SerialContext, uuid: ObjectUuid, index: usize) -> Self {
        ctx.begin_changing_property(uuid, index);
        Self { ctx, uuid, index }
    }
}

impl Drop for ChangingPropertyGuard<'_> {
    fn drop(&mut self) {
        self.ctx.end_changing_property(self.uuid, self.index);
    }
}

/// Reentrant per-(object, property) counters backing the
/// changing-property methods of a context.
#[derive(Debug, Default)]
pub struct ChangingCounters(HashMap<(ObjectUuid, usize), usize>);

impl ChangingCounters {
    pub fn begin(&mut self, key: (ObjectUuid, usize)) {
        *self.0.entry(key).or_insert(0) += 1;
    }

    pub fn end(&mut self, key: (ObjectUuid, usize)) {
        if let Some(count) = self.0.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.0.remove(&key);
            }
        }
    }

    pub fn contains(&self, key: &(ObjectUuid, usize)) -> bool {
        self.0.contains_key(key)
    }
}

/// A context with no channel behind it.
///
/// Dependent objects are collected instead of sent, and references resolve
/// through the registry alone. Useful for copying objects through JSON and
/// for exercising serializers in isolation.
pub struct LocalContext {
    registry: Arc<IdentityRegistry>,
    serializers: Arc<SerializerCache>,
    dependents: Mutex<Vec<ObjectHandle>>,
    changing: Mutex<ChangingCounters>,
}

impl LocalContext {
    pub fn new(registry: Arc<IdentityRegistry>, serializers: Arc<SerializerCache>) -> Self {
        Self {
            registry,
            serializers,
            dependents: Mutex::new(Vec::new()),
            changing: Mutex::new(ChangingCounters::default()),
        }
    }

    /// Dependent objects collected so far, in discovery order.
    pub fn take_dependents(&self) -> Vec<ObjectHandle> {
        std::mem::take(&mut *self.dependents.lock().expect("context lock poisoned"))
    }
}

#[async_trait]
impl SerialContext for LocalContext {
    fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    fn serializers(&self) -> &Arc<SerializerCache> {
        &self.serializers
    }

    fn put_dependent_object(&self, object: &ObjectHandle) {
        let mut dependents = self.dependents.lock().expect("context lock poisoned");
        if !dependents.iter().any(|d| d.ptr_eq(object)) {
            dependents.push(object.clone());
        }
    }

    fn begin_changing_property(&self, uuid: ObjectUuid, index: usize) {
        self.changing
            .lock()
            .expect("context lock poisoned")
            .begin((uuid, index));
    }

    fn end_changing_property(&self, uuid: ObjectUuid, index: usize) {
        self.changing
            .lock()
            .expect("context lock poisoned")
            .end((uuid, index));
    }

    fn is_changing_property(&self, uuid: ObjectUuid, index: usize) -> bool {
        self.changing
            .lock()
            .expect("context lock poisoned")
            .contains(&(uuid, index))
    }
}
