use std::collections::BTreeMap;
use std::sync::RwLock;

use tether_model::ObjectHandle;

/// Top-level objects published under URIs.
///
/// Server channels push every published object and its mapping to a peer
/// before acknowledging the peer's `open`.
#[derive(Default)]
pub struct UriDirectory {
    entries: RwLock<BTreeMap<String, ObjectHandle>>,
}

impl UriDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `object` under `uri`, returning the object it replaces.
    pub fn publish(&self, uri: impl Into<String>, object: ObjectHandle) -> Option<ObjectHandle> {
        self.entries
            .write()
            .expect("uri lock poisoned")
            .insert(uri.into(), object)
    }

    pub fn unpublish(&self, uri: &str) -> Option<ObjectHandle> {
        self.entries.write().expect("uri lock poisoned").remove(uri)
    }

    pub fn get(&self, uri: &str) -> Option<ObjectHandle> {
        self.entries.read().expect("uri lock poisoned").get(uri).cloned()
    }

    /// Every mapping, in URI order.
    pub fn entries(&self) -> Vec<(String, ObjectHandle)> {
        self.entries
            .read()
            .expect("uri lock poisoned")
            .iter()
            .map(|(uri, object)| (uri.clone(), object.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("uri lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
