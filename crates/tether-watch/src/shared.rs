use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tether_model::ObjectHandle;
use tether_serial::{serialize_change, PropertyChangeEvent, SerializerCache, WatchGuard};
use tether_types::ObjectUuid;
use tracing::{debug, trace};

use crate::error::{WatchError, WatchResult};
use crate::status::WatcherStatus;
use crate::subscriber::WatchSubscriber;

struct Slot {
    id: ObjectUuid,
    subscriber: Weak<dyn WatchSubscriber>,
    count: usize,
}

struct WatchedObject {
    object: ObjectHandle,
    guard: WatchGuard,
    slots: Vec<Slot>,
}

#[derive(Default)]
struct WatcherState {
    objects: HashMap<ObjectUuid, WatchedObject>,
    dirty: BTreeSet<ObjectUuid>,
}

/// Shared machinery of both watcher flavours.
pub(crate) struct WatcherCore {
    serializers: Arc<SerializerCache>,
    state: Arc<Mutex<WatcherState>>,
    exclusive: bool,
}

impl WatcherCore {
    pub(crate) fn new(serializers: Arc<SerializerCache>, exclusive: bool) -> Self {
        Self {
            serializers,
            state: Arc::new(Mutex::new(WatcherState::default())),
            exclusive,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatcherState> {
        self.state.lock().expect("watcher lock poisoned")
    }

    pub(crate) fn watch_object(
        &self,
        object: &ObjectHandle,
        subscriber: &Arc<dyn WatchSubscriber>,
    ) -> WatchResult<()> {
        let uuid = object.uuid();
        let id = subscriber.subscriber_id();
        let mut state = self.lock();
        if let Some(watched) = state.objects.get_mut(&uuid) {
            watched.slots.retain(|s| s.subscriber.strong_count() > 0);
            if self.exclusive {
                if let Some(other) = watched.slots.iter().find(|s| s.id != id) {
                    return Err(WatchError::SubscriberConflict {
                        uuid,
                        existing: other.id,
                    });
                }
            }
            match watched.slots.iter_mut().find(|s| s.id == id) {
                Some(slot) if self.exclusive => slot.count = 1,
                Some(slot) => slot.count += 1,
                None => watched.slots.push(Slot {
                    id,
                    subscriber: Arc::downgrade(subscriber),
                    count: 1,
                }),
            }
            return Ok(());
        }

        let state_ref = Arc::downgrade(&self.state);
        let guard = self
            .serializers
            .for_object(object)
            .watch_for_changes(object, Arc::new(move |event| on_change(&state_ref, event)));
        state.objects.insert(
            uuid,
            WatchedObject {
                object: object.clone(),
                guard,
                slots: vec![Slot {
                    id,
                    subscriber: Arc::downgrade(subscriber),
                    count: 1,
                }],
            },
        );
        debug!(uuid = %uuid, subscriber = %id, "watching object");
        Ok(())
    }

    /// Drop one reference from `subscriber` to `uuid`. Returns `true` when
    /// the object is no longer watched at all.
    pub(crate) fn unwatch_object(&self, uuid: ObjectUuid, subscriber: ObjectUuid) -> bool {
        let released = {
            let mut state = self.lock();
            let Some(watched) = state.objects.get_mut(&uuid) else {
                return false;
            };
            if let Some(pos) = watched.slots.iter().position(|s| s.id == subscriber) {
                watched.slots[pos].count -= 1;
                if watched.slots[pos].count == 0 {
                    watched.slots.remove(pos);
                }
            }
            if watched.slots.is_empty() {
                state.dirty.remove(&uuid);
                state.objects.remove(&uuid)
            } else {
                None
            }
        };
        match released {
            Some(watched) => {
                debug!(uuid = %uuid, "no longer watching object");
                drop(watched.guard);
                true
            }
            None => false,
        }
    }

    /// Remove a subscriber from every object it watches.
    pub(crate) fn unwatch_subscriber(&self, subscriber: ObjectUuid) -> usize {
        let released: Vec<WatchedObject> = {
            let mut state = self.lock();
            for watched in state.objects.values_mut() {
                watched.slots.retain(|s| s.id != subscriber);
            }
            let empty: Vec<ObjectUuid> = state
                .objects
                .iter()
                .filter(|(_, w)| w.slots.is_empty())
                .map(|(uuid, _)| *uuid)
                .collect();
            empty
                .into_iter()
                .filter_map(|uuid| {
                    state.dirty.remove(&uuid);
                    state.objects.remove(&uuid)
                })
                .collect()
        };
        let count = released.len();
        drop(released);
        count
    }

    pub(crate) fn is_watching(&self, uuid: ObjectUuid) -> bool {
        self.lock().objects.contains_key(&uuid)
    }

    pub(crate) fn watched_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub(crate) fn is_dirty(&self, uuid: ObjectUuid) -> bool {
        self.lock().dirty.contains(&uuid)
    }

    /// Drain the dirty set, returning the dirty objects that are still
    /// watched.
    pub(crate) fn take_dirty(&self) -> Vec<ObjectHandle> {
        let mut state = self.lock();
        let dirty = std::mem::take(&mut state.dirty);
        dirty
            .into_iter()
            .filter_map(|uuid| state.objects.get(&uuid).map(|w| w.object.clone()))
            .collect()
    }

    pub(crate) fn clear_dirty(&self) {
        self.lock().dirty.clear();
    }

    pub(crate) fn clear_dirty_object(&self, uuid: ObjectUuid) -> bool {
        self.lock().dirty.remove(&uuid)
    }

    pub(crate) fn status(&self) -> WatcherStatus {
        let state = self.lock();
        WatcherStatus {
            num_watched_objects: state.objects.len(),
            num_dirty_objects: state.dirty.len(),
            dirty: state.dirty.iter().copied().collect(),
        }
    }
}

fn on_change(state: &Weak<Mutex<WatcherState>>, event: &PropertyChangeEvent) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let uuid = event.object.uuid();
    let Some(prop) = event.object.descriptor().property_at(event.index).cloned() else {
        return;
    };

    let subscribers: Vec<Arc<dyn WatchSubscriber>> = {
        let state = state.lock().expect("watcher lock poisoned");
        match state.objects.get(&uuid) {
            Some(watched) => watched
                .slots
                .iter()
                .filter_map(|s| s.subscriber.upgrade())
                .filter(|s| !s.is_changing_property(uuid, event.index))
                .collect(),
            None => return,
        }
    };
    if subscribers.is_empty() {
        trace!(uuid = %uuid, property = prop.name(), "change applied by every subscriber, not dirty");
        return;
    }

    state
        .lock()
        .expect("watcher lock poisoned")
        .dirty
        .insert(uuid);
    for subscriber in subscribers {
        let record = serialize_change(subscriber.as_context(), &prop, &event.change);
        subscriber.property_changed(&event.object, &prop, record);
    }
}
