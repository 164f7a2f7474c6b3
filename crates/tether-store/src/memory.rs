use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value as Json;
use tether_types::{fields, ObjectUuid};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::{Projection, Query};
use crate::traits::BackingStore;

/// In-memory document store.
///
/// Intended for tests and embedding. Documents are held behind a `RwLock`,
/// ordered by identity (UUID v7 identities therefore iterate in creation
/// order), and cloned on read and write.
pub struct InMemoryBackingStore {
    documents: RwLock<BTreeMap<ObjectUuid, Json>>,
}

impl InMemoryBackingStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.documents.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.read().expect("lock poisoned").is_empty()
    }

    /// The stored document for `uuid`, if any.
    pub fn get(&self, uuid: ObjectUuid) -> Option<Json> {
        self.documents
            .read()
            .expect("lock poisoned")
            .get(&uuid)
            .cloned()
    }

    /// Remove all documents from the store.
    pub fn clear(&self) {
        self.documents.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn find_one(&self, query: &Query, projection: Option<&Projection>) -> StoreResult<Option<Json>> {
        let docs = self.documents.read().expect("lock poisoned");
        let found = match query.uuid_key() {
            Some(uuid) => docs.get(&uuid).filter(|doc| query.matches(doc)),
            None => docs.values().find(|doc| query.matches(doc)),
        };
        Ok(found.map(|doc| project(doc, projection)))
    }

    fn find(&self, query: &Query, projection: Option<&Projection>) -> StoreResult<Vec<Json>> {
        let docs = self.documents.read().expect("lock poisoned");
        Ok(docs
            .values()
            .filter(|doc| query.matches(doc))
            .map(|doc| project(doc, projection))
            .collect())
    }

    fn put(&self, document: Json) -> StoreResult<()> {
        if !document.is_object() {
            return Err(StoreError::InvalidDocument(document.to_string()));
        }
        let uuid = fields::uuid_of(&document)?;
        debug!(uuid = %uuid, "storing document");
        self.documents
            .write()
            .expect("lock poisoned")
            .insert(uuid, document);
        Ok(())
    }

    fn find_and_remove(&self, query: &Query) -> StoreResult<Option<Json>> {
        let mut docs = self.documents.write().expect("lock poisoned");
        let key = match query.uuid_key() {
            Some(uuid) => docs
                .get(&uuid)
                .filter(|doc| query.matches(doc))
                .map(|_| uuid),
            None => docs
                .iter()
                .find(|(_, doc)| query.matches(doc))
                .map(|(uuid, _)| *uuid),
        };
        Ok(key.and_then(|uuid| docs.remove(&uuid)))
    }
}

fn project(doc: &Json, projection: Option<&Projection>) -> Json {
    match projection {
        Some(p) => p.apply(doc),
        None => doc.clone(),
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackingStore")
            .field("document_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(uuid: ObjectUuid, title: &str) -> Json {
        json!({"_uuid": uuid.to_string(), "_classname": "Page", "title": title})
    }

    #[test]
    fn put_then_find_one() {
        let store = InMemoryBackingStore::new();
        let id = ObjectUuid::new();
        store.put(doc(id, "a")).unwrap();
        let found = store.find_one(&Query::by_uuid(id), None).unwrap().unwrap();
        assert_eq!(found["title"], json!("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_is_upsert() {
        let store = InMemoryBackingStore::new();
        let id = ObjectUuid::new();
        store.put(doc(id, "a")).unwrap();
        store.put(doc(id, "b")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap()["title"], json!("b"));
    }

    #[test]
    fn put_rejects_documents_without_identity() {
        let store = InMemoryBackingStore::new();
        assert!(matches!(
            store.put(json!({"title": "x"})),
            Err(StoreError::Identity(_))
        ));
        assert!(matches!(
            store.put(json!("x")),
            Err(StoreError::InvalidDocument(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn find_filters_and_projects() {
        let store = InMemoryBackingStore::new();
        let a = ObjectUuid::new();
        let b = ObjectUuid::new();
        store.put(doc(a, "same")).unwrap();
        store.put(doc(b, "same")).unwrap();
        store.put(doc(ObjectUuid::new(), "other")).unwrap();
        let hits = store
            .find(
                &Query::all().with("title", json!("same")),
                Some(&Projection::fields(["title"])),
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], json!({"_uuid": a.to_string(), "title": "same"}));
    }

    #[test]
    fn identity_lookups_still_check_other_fields() {
        let store = InMemoryBackingStore::new();
        let id = ObjectUuid::new();
        store.put(doc(id, "x")).unwrap();
        let wrong_title = Query::by_uuid(id).with("title", json!("y"));
        assert!(store.find_one(&wrong_title, None).unwrap().is_none());
        assert!(store.find_and_remove(&wrong_title).unwrap().is_none());
        assert_eq!(store.len(), 1);
        let right_title = Query::by_uuid(id).with("title", json!("x"));
        assert_eq!(store.find_one(&right_title, None).unwrap(), Some(doc(id, "x")));
        assert!(store.find_one(&Query::by_uuid(ObjectUuid::new()), None).unwrap().is_none());
    }

    #[test]
    fn find_and_remove_takes_document() {
        let store = InMemoryBackingStore::new();
        let id = ObjectUuid::new();
        store.put(doc(id, "x")).unwrap();
        let removed = store.find_and_remove(&Query::by_uuid(id)).unwrap();
        assert!(removed.is_some());
        assert!(store.find_and_remove(&Query::by_uuid(id)).unwrap().is_none());
        assert!(store.is_empty());
    }
}
