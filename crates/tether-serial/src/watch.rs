use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tether_model::{
    ArrayEvent, ArrayMutation, KeyedCollection, ListenerId, MapEvent, MapMutation, ObjectHandle,
    OrderedCollection, PropertyChange, PropertyDescriptor, Value, WeakObjectHandle,
};
use tracing::warn;

use crate::change::{LiveChange, PropertyChangeEvent};

/// Receives every change reported by a watch.
pub type ChangeCallback = Arc<dyn Fn(&PropertyChangeEvent) + Send + Sync>;

enum ContentListener {
    List(OrderedCollection, ListenerId),
    Map(KeyedCollection, ListenerId),
}

impl ContentListener {
    fn detach(self) {
        match self {
            Self::List(list, id) => {
                list.remove_listener(id);
            }
            Self::Map(map, id) => {
                map.remove_listener(id);
            }
        }
    }
}

type ContentListeners = Arc<Mutex<HashMap<usize, ContentListener>>>;

/// Keeps a watch alive. Dropping it removes every listener it installed.
pub struct WatchGuard {
    object: WeakObjectHandle,
    listener: ListenerId,
    content: ContentListeners,
}

impl WatchGuard {
    pub fn release(self) {}
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(object) = self.object.upgrade() {
            object.remove_property_listener(self.listener);
        }
        let listeners: Vec<ContentListener> = self
            .content
            .lock()
            .expect("watch lock poisoned")
            .drain()
            .map(|(_, l)| l)
            .collect();
        for listener in listeners {
            listener.detach();
        }
    }
}

pub(crate) fn watch_object(
    properties: &[PropertyDescriptor],
    object: &ObjectHandle,
    callback: ChangeCallback,
) -> WatchGuard {
    let watched: Arc<HashSet<usize>> = Arc::new(properties.iter().map(|p| p.index()).collect());
    let content: ContentListeners = Arc::new(Mutex::new(HashMap::new()));
    let weak = object.downgrade();

    for index in watched.iter().copied() {
        if let Some(value) = object.get_at(index) {
            attach_content(&content, &weak, index, &value, &callback);
        }
    }

    let listener = {
        let content = Arc::clone(&content);
        let callback = Arc::clone(&callback);
        let weak = weak.clone();
        object.on_property_change(move |change: &PropertyChange| {
            if !watched.contains(&change.index) {
                return;
            }
            attach_content(&content, &weak, change.index, &change.new, &callback);
            let live = match &change.new {
                Value::List(list) => LiveChange::ArrayReplace(list.to_vec()),
                Value::Map(map) => LiveChange::MapReplace(map.to_map()),
                other => LiveChange::Set(other.clone()),
            };
            callback(&PropertyChangeEvent {
                object: change.object.clone(),
                index: change.index,
                change: live,
            });
        })
    };

    WatchGuard {
        object: weak,
        listener,
        content,
    }
}

/// Listen to the contents of a collection-valued slot, replacing whatever
/// listener the slot had before.
fn attach_content(
    content: &ContentListeners,
    object: &WeakObjectHandle,
    index: usize,
    value: &Value,
    callback: &ChangeCallback,
) {
    let listener = match value {
        Value::List(list) => {
            let (object, callback) = (object.clone(), Arc::clone(callback));
            let id = list.on_change(move |event: &ArrayEvent| {
                let Some(object) = object.upgrade() else {
                    return;
                };
                let change = translate_array(event);
                warn_unloaded(&object, &change);
                callback(&PropertyChangeEvent {
                    object,
                    index,
                    change,
                });
            });
            Some(ContentListener::List(list.clone(), id))
        }
        Value::Map(map) => {
            let (object, callback) = (object.clone(), Arc::clone(callback));
            let id = map.on_change(move |event: &MapEvent| {
                let Some(object) = object.upgrade() else {
                    return;
                };
                let change = translate_map(event);
                warn_unloaded(&object, &change);
                callback(&PropertyChangeEvent {
                    object,
                    index,
                    change,
                });
            });
            Some(ContentListener::Map(map.clone(), id))
        }
        _ => None,
    };

    let previous = {
        let mut content = content.lock().expect("watch lock poisoned");
        match listener {
            Some(listener) => content.insert(index, listener),
            None => content.remove(&index),
        }
    };
    if let Some(previous) = previous {
        previous.detach();
    }
}

/// Pure tail appends, and removals that leave no equal element behind,
/// travel as incremental changes. Anything else is a full snapshot.
fn translate_array(event: &ArrayEvent) -> LiveChange {
    let contents = event.collection.to_vec();
    match &event.mutation {
        ArrayMutation::Splice {
            start,
            added,
            removed,
        } => {
            if removed.is_empty() && start + added.len() == contents.len() {
                LiveChange::ArrayChange {
                    added: added.clone(),
                    removed: Vec::new(),
                }
            } else if added.is_empty() && removed.iter().all(|r| !contents.contains(r)) {
                LiveChange::ArrayChange {
                    added: Vec::new(),
                    removed: removed.clone(),
                }
            } else {
                LiveChange::ArrayReplace(contents)
            }
        }
        ArrayMutation::Reset { .. } => LiveChange::ArrayReplace(contents),
    }
}

fn translate_map(event: &MapEvent) -> LiveChange {
    match &event.mutation {
        MapMutation::Put { key, value, .. } => LiveChange::MapChange {
            put: [(key.clone(), value.clone())].into_iter().collect(),
            removed: Vec::new(),
        },
        MapMutation::Remove { key, .. } => LiveChange::MapChange {
            put: Default::default(),
            removed: vec![key.clone()],
        },
        MapMutation::Reset { .. } => LiveChange::MapReplace(event.collection.to_map()),
    }
}

fn warn_unloaded(object: &ObjectHandle, change: &LiveChange) {
    let added: Vec<&Value> = match change {
        LiveChange::ArrayChange { added, .. } => added.iter().collect(),
        LiveChange::ArrayReplace(values) => values.iter().collect(),
        LiveChange::MapChange { put, .. } => put.values().collect(),
        LiveChange::MapReplace(values) => values.values().collect(),
        LiveChange::Set(_) => Vec::new(),
    };
    for value in added {
        if let Value::Object(element) = value {
            if !element.is_loaded() {
                warn!(
                    uuid = %object.uuid(),
                    element = %element.uuid(),
                    "collection holds an object that has not finished loading"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SerialContext;
    use crate::testing::{fixture, Fixture};

    type Log = Arc<Mutex<Vec<PropertyChangeEvent>>>;

    fn recorder() -> (Log, ChangeCallback) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, Arc::new(move |e: &PropertyChangeEvent| sink.lock().unwrap().push(e.clone())))
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    #[test]
    fn persistent_assignments_are_reported() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let (log, callback) = recorder();
        let _guard = ctx.serializers().for_object(&page).watch_for_changes(&page, callback);

        page.set("title", "a").unwrap();
        page.set("secret", "not watched").unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(matches!(&log[0].change, LiveChange::Set(v) if *v == text("a")));
    }

    #[test]
    fn appends_and_clean_removals_are_incremental() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let tags = page.list("tags").unwrap();
        tags.push(text("x"));
        let (log, callback) = recorder();
        let _guard = ctx.serializers().for_object(&page).watch_for_changes(&page, callback);

        tags.push(text("a"));
        tags.push(text("b"));
        tags.remove(&text("x"));

        let log = log.lock().unwrap();
        let changes: Vec<_> = log.iter().map(|e| e.change.clone()).collect();
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], LiveChange::ArrayChange { added, removed } if *added == vec![text("a")] && removed.is_empty()));
        assert!(matches!(&changes[2], LiveChange::ArrayChange { added, removed } if added.is_empty() && *removed == vec![text("x")]));
    }

    #[test]
    fn ambiguous_edits_become_snapshots() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let tags = page.list("tags").unwrap();
        tags.extend(vec![text("a"), text("b"), text("a")]);
        let (log, callback) = recorder();
        let _guard = ctx.serializers().for_object(&page).watch_for_changes(&page, callback);

        tags.remove(&text("a"));
        tags.insert(0, text("z"));
        tags.move_item(0, 1);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log
            .iter()
            .all(|e| matches!(e.change, LiveChange::ArrayReplace(_))));
    }

    #[test]
    fn replaced_collections_are_rewired() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let old = page.list("tags").unwrap();
        let (log, callback) = recorder();
        let _guard = ctx.serializers().for_object(&page).watch_for_changes(&page, callback);

        let fresh = OrderedCollection::from_values(vec![text("n")]);
        page.set("tags", fresh.clone()).unwrap();
        old.push(text("ignored"));
        fresh.push(text("m"));

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(matches!(&log[0].change, LiveChange::ArrayReplace(v) if *v == vec![text("n")]));
        assert!(matches!(&log[1].change, LiveChange::ArrayChange { added, .. } if *added == vec![text("m")]));
        assert_eq!(old.listener_count(), 0);
    }

    #[test]
    fn map_mutations() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let meta = page.map("meta").unwrap();
        let (log, callback) = recorder();
        let _guard = ctx.serializers().for_object(&page).watch_for_changes(&page, callback);

        meta.put("a", Value::Integer(1));
        meta.remove("a");
        meta.clear();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(matches!(&log[0].change, LiveChange::MapChange { put, .. } if put.get("a") == Some(&Value::Integer(1))));
        assert!(matches!(&log[1].change, LiveChange::MapChange { removed, .. } if *removed == vec!["a".to_string()]));
    }

    #[test]
    fn dropping_the_guard_detaches_everything() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let serializer = ctx.serializers().for_object(&page);
        let (log, callback) = recorder();
        let guard = serializer.watch_for_changes(&page, callback);
        assert_eq!(page.property_listener_count(), 1);
        assert_eq!(page.list("tags").unwrap().listener_count(), 1);

        serializer.unwatch_for_changes(guard);
        page.set("title", "t").unwrap();
        page.list("tags").unwrap().push(text("q"));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(page.property_listener_count(), 0);
        assert_eq!(page.list("tags").unwrap().listener_count(), 0);
    }
}
