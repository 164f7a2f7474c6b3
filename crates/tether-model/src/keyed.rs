use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::listener::{ListenerId, ListenerSet};
use crate::value::Value;

/// An observable map from string keys to values.
///
/// Clones share the same underlying map. Listeners receive a [`MapEvent`]
/// after each effective mutation; writing an equal value, or removing an
/// absent key, emits nothing.
#[derive(Clone)]
pub struct KeyedCollection {
    inner: Arc<KeyedInner>,
}

struct KeyedInner {
    entries: RwLock<BTreeMap<String, Value>>,
    listeners: ListenerSet<MapEvent>,
}

/// A change to a [`KeyedCollection`].
#[derive(Clone, Debug)]
pub struct MapEvent {
    pub collection: KeyedCollection,
    pub mutation: MapMutation,
}

#[derive(Clone, Debug)]
pub enum MapMutation {
    Put {
        key: String,
        value: Value,
        previous: Option<Value>,
    },
    Remove {
        key: String,
        previous: Value,
    },
    /// The contents were replaced wholesale.
    Reset { previous: BTreeMap<String, Value> },
}

impl KeyedCollection {
    pub fn new() -> Self {
        Self::from_entries(BTreeMap::new())
    }

    /// Create a map with initial contents. No event is emitted.
    pub fn from_entries(entries: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(KeyedInner {
                entries: RwLock::new(entries),
                listeners: ListenerSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of the current contents.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    /// Insert or overwrite `key`. Returns the previous value.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let previous = {
            let mut entries = self.inner.entries.write().expect("map lock poisoned");
            if entries.get(&key) == Some(&value) {
                return Some(value);
            }
            entries.insert(key.clone(), value.clone())
        };
        self.emit(MapMutation::Put {
            key,
            value,
            previous: previous.clone(),
        });
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self
            .inner
            .entries
            .write()
            .expect("map lock poisoned")
            .remove(key)?;
        self.emit(MapMutation::Remove {
            key: key.to_string(),
            previous: previous.clone(),
        });
        Some(previous)
    }

    /// Replace the whole contents, keeping this map instance.
    pub fn replace_all(&self, entries: BTreeMap<String, Value>) {
        let previous = {
            let mut current = self.inner.entries.write().expect("map lock poisoned");
            std::mem::replace(&mut *current, entries)
        };
        self.emit(MapMutation::Reset { previous });
    }

    pub fn clear(&self) {
        if !self.is_empty() {
            self.replace_all(BTreeMap::new());
        }
    }

    pub fn on_change<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&MapEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Returns `true` if both handles refer to the same map.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.inner.entries.read().expect("map lock poisoned")
    }

    fn emit(&self, mutation: MapMutation) {
        let event = MapEvent {
            collection: self.clone(),
            mutation,
        };
        self.inner.listeners.emit(&event);
    }
}

impl Default for KeyedCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCollection")
            .field("len", &self.len())
            .finish()
    }
}
