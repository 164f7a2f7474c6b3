use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Handle returned when a listener is registered; used to remove it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A set of synchronous event listeners.
///
/// `emit` snapshots the current listeners and calls them with the internal
/// lock released, so a listener may add or remove listeners (including
/// itself) while being notified.
pub struct ListenerSet<E> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> ListenerSet<E> {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener.
    pub fn add<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push((id, Arc::new(f)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Notify every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .listeners
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener lock poisoned").len()
    }

    /// Returns `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_all_listeners() {
        let set = ListenerSet::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = Arc::clone(&total);
            set.add(move |n| {
                total.fetch_add(*n as usize, Ordering::SeqCst);
            });
        }
        set.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn removed_listener_is_silent() {
        let set = ListenerSet::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = set.add(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn listener_may_register_during_emit() {
        let set = Arc::new(ListenerSet::<()>::new());
        let inner = Arc::clone(&set);
        set.add(move |_| {
            inner.add(|_| {});
        });
        set.emit(&());
        assert_eq!(set.len(), 2);
    }
}
