use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tether_model::ObjectHandle;
use tether_registry::IdentityRegistry;
use tether_serial::{ChangingCounters, SerializerCache};
use tether_types::ObjectUuid;

use crate::config::ChannelConfig;

#[derive(Default)]
struct EndpointState {
    put_depth: usize,
    dependents: VecDeque<ObjectHandle>,
    queued: HashSet<ObjectUuid>,
    changing: ChangingCounters,
}

/// Bookkeeping every channel owns: identity, collaborators, the put-queue
/// depth, the dependent queue, and echo-suppression counters.
pub struct EndpointCore {
    id: ObjectUuid,
    config: ChannelConfig,
    registry: Arc<IdentityRegistry>,
    serializers: Arc<SerializerCache>,
    state: Mutex<EndpointState>,
}

impl EndpointCore {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        serializers: Arc<SerializerCache>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            id: ObjectUuid::new(),
            config,
            registry,
            serializers,
            state: Mutex::new(EndpointState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EndpointState> {
        self.state.lock().expect("endpoint lock poisoned")
    }

    /// Channel identity; also its subscriber id with watchers.
    pub fn id(&self) -> ObjectUuid {
        self.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn serializers(&self) -> &Arc<SerializerCache> {
        &self.serializers
    }

    /// Enter the put queue. Returns the new depth.
    pub fn grab(&self) -> usize {
        let mut state = self.lock();
        state.put_depth += 1;
        state.put_depth
    }

    /// Leave the put queue. Returns the remaining depth.
    pub fn release(&self) -> usize {
        let mut state = self.lock();
        state.put_depth = state.put_depth.saturating_sub(1);
        state.put_depth
    }

    pub fn put_depth(&self) -> usize {
        self.lock().put_depth
    }

    /// Queue a dependent object unless it is already queued.
    pub fn queue_dependent(&self, object: &ObjectHandle) -> bool {
        let mut state = self.lock();
        if !state.queued.insert(object.uuid()) {
            return false;
        }
        state.dependents.push_back(object.clone());
        true
    }

    /// Take every queued dependent, in discovery order.
    pub fn take_dependents(&self) -> Vec<ObjectHandle> {
        let mut state = self.lock();
        state.queued.clear();
        state.dependents.drain(..).collect()
    }

    pub fn has_dependents(&self) -> bool {
        !self.lock().dependents.is_empty()
    }

    pub fn begin_changing(&self, uuid: ObjectUuid, index: usize) {
        self.lock().changing.begin((uuid, index));
    }

    pub fn end_changing(&self, uuid: ObjectUuid, index: usize) {
        self.lock().changing.end((uuid, index));
    }

    pub fn is_changing(&self, uuid: ObjectUuid, index: usize) -> bool {
        self.lock().changing.contains(&(uuid, index))
    }
}
