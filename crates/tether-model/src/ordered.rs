use std::fmt;
use std::sync::{Arc, RwLock};

use crate::listener::{ListenerId, ListenerSet};
use crate::value::Value;

/// An observable, ordered collection of values.
///
/// Clones share the same underlying collection. Every mutation that changes
/// the contents notifies listeners with an [`ArrayEvent`].
#[derive(Clone)]
pub struct OrderedCollection {
    inner: Arc<OrderedInner>,
}

struct OrderedInner {
    items: RwLock<Vec<Value>>,
    listeners: ListenerSet<ArrayEvent>,
}

/// A change to an [`OrderedCollection`].
#[derive(Clone, Debug)]
pub struct ArrayEvent {
    pub collection: OrderedCollection,
    pub mutation: ArrayMutation,
}

#[derive(Clone, Debug)]
pub enum ArrayMutation {
    /// `removed` was taken out at `start` and `added` inserted in its place.
    Splice {
        start: usize,
        added: Vec<Value>,
        removed: Vec<Value>,
    },
    /// The contents were replaced wholesale (including reorders and clears).
    Reset { previous: Vec<Value> },
}

impl OrderedCollection {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    /// Create a collection with initial contents. No event is emitted.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(OrderedInner {
                items: RwLock::new(values),
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

    pub fn get(&self, index: usize) -> Option<Value> {
        self.read().get(index).cloned()
    }

    /// Snapshot of the current contents.
    pub fn to_vec(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.read().iter().any(|v| v == value)
    }

    pub fn position(&self, value: &Value) -> Option<usize> {
        self.read().iter().position(|v| v == value)
    }

    pub fn push(&self, value: Value) {
        let end = self.len();
        self.splice(end, 0, vec![value]);
    }

    pub fn extend(&self, values: Vec<Value>) {
        let end = self.len();
        self.splice(end, 0, values);
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: Value) {
        self.splice(index, 0, vec![value]);
    }

    pub fn remove_at(&self, index: usize) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        self.splice(index, 1, Vec::new()).into_iter().next()
    }

    /// Remove the first element equal to `value`.
    pub fn remove(&self, value: &Value) -> bool {
        match self.position(value) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Remove the last element equal to `value`.
    pub fn remove_last(&self, value: &Value) -> bool {
        let index = self.read().iter().rposition(|v| v == value);
        match index {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Remove `delete_count` elements at `start` and insert `added` there.
    ///
    /// Both bounds are clamped to the current contents. Returns the removed
    /// elements. Emits nothing when the call changes nothing.
    pub fn splice(&self, start: usize, delete_count: usize, added: Vec<Value>) -> Vec<Value> {
        let (start, removed) = {
            let mut items = self.inner.items.write().expect("collection lock poisoned");
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, added.iter().cloned()).collect();
            (start, removed)
        };
        if removed.is_empty() && added.is_empty() {
            return removed;
        }
        self.emit(ArrayMutation::Splice {
            start,
            added,
            removed: removed.clone(),
        });
        removed
    }

    /// Move one element. Emitted as a reset, since positions shift.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let previous = {
            let mut items = self.inner.items.write().expect("collection lock poisoned");
            if from >= items.len() || to >= items.len() {
                return false;
            }
            if from == to {
                return true;
            }
            let previous = items.clone();
            let item = items.remove(from);
            items.insert(to, item);
            previous
        };
        self.emit(ArrayMutation::Reset { previous });
        true
    }

    /// Replace the whole contents, keeping this collection instance.
    pub fn replace_all(&self, values: Vec<Value>) {
        let previous = {
            let mut items = self.inner.items.write().expect("collection lock poisoned");
            std::mem::replace(&mut *items, values)
        };
        self.emit(ArrayMutation::Reset { previous });
    }

    pub fn clear(&self) {
        if !self.is_empty() {
            self.replace_all(Vec::new());
        }
    }

    pub fn on_change<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ArrayEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Returns `true` if both handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Value>> {
        self.inner.items.read().expect("collection lock poisoned")
    }

    fn emit(&self, mutation: ArrayMutation) {
        let event = ArrayEvent {
            collection: self.clone(),
            mutation,
        };
        self.inner.listeners.emit(&event);
    }
}

impl Default for OrderedCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OrderedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedCollection")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorded(list: &OrderedCollection) -> Arc<Mutex<Vec<ArrayMutation>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        list.on_change(move |event| sink.lock().unwrap().push(event.mutation.clone()));
        log
    }

    fn ints(list: &OrderedCollection) -> Vec<i64> {
        list.to_vec().iter().filter_map(Value::as_i64).collect()
    }

    #[test]
    fn push_emits_tail_splice() {
        let list = OrderedCollection::from_values(vec![Value::from(1)]);
        let log = recorded(&list);
        list.push(Value::from(2));
        assert_eq!(ints(&list), vec![1, 2]);
        let log = log.lock().unwrap();
        match &log[..] {
            [ArrayMutation::Splice { start, added, removed }] => {
                assert_eq!(*start, 1);
                assert_eq!(added, &vec![Value::from(2)]);
                assert!(removed.is_empty());
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn splice_clamps_bounds() {
        let list = OrderedCollection::from_values(vec![Value::from(1), Value::from(2)]);
        let removed = list.splice(1, 10, vec![Value::from(9)]);
        assert_eq!(removed, vec![Value::from(2)]);
        assert_eq!(ints(&list), vec![1, 9]);
        list.insert(100, Value::from(3));
        assert_eq!(ints(&list), vec![1, 9, 3]);
    }

    #[test]
    fn noop_splice_is_silent() {
        let list = OrderedCollection::new();
        let log = recorded(&list);
        list.splice(0, 5, Vec::new());
        list.clear();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_first_and_last() {
        let list = OrderedCollection::from_values(vec![
            Value::from(1),
            Value::from(2),
            Value::from(1),
        ]);
        assert!(list.remove_last(&Value::from(1)));
        assert_eq!(ints(&list), vec![1, 2]);
        assert!(list.remove(&Value::from(1)));
        assert_eq!(ints(&list), vec![2]);
        assert!(!list.remove(&Value::from(7)));
    }

    #[test]
    fn move_item_emits_reset() {
        let list = OrderedCollection::from_values(vec![
            Value::from(1),
            Value::from(2),
            Value::from(3),
        ]);
        let log = recorded(&list);
        assert!(list.move_item(0, 2));
        assert_eq!(ints(&list), vec![2, 3, 1]);
        assert!(!list.move_item(0, 5));
        let log = log.lock().unwrap();
        assert!(matches!(&log[..], [ArrayMutation::Reset { previous }] if previous.len() == 3));
    }

    #[test]
    fn clones_share_contents() {
        let a = OrderedCollection::new();
        let b = a.clone();
        b.push(Value::from("x"));
        assert_eq!(a.len(), 1);
        assert!(a.ptr_eq(&b));
    }
}
