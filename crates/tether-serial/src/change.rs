use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use tether_model::{
    KeyedCollection, ObjectHandle, OrderedCollection, PropertyDescriptor, PropertyType, Value,
};
use tether_types::{ChangeBundle, ChangeRecord};
use tracing::{debug, warn};

use crate::context::{ChangingPropertyGuard, SerialContext};
use crate::convert;
use crate::error::SerialResult;
use crate::serializer::apply_value;

/// A mutation observed on a live object, before serialization.
#[derive(Clone, Debug)]
pub enum LiveChange {
    Set(Value),
    ArrayReplace(Vec<Value>),
    /// Remove each of `removed` (last equal occurrence), then append `added`.
    ArrayChange {
        added: Vec<Value>,
        removed: Vec<Value>,
    },
    MapReplace(BTreeMap<String, Value>),
    MapChange {
        put: BTreeMap<String, Value>,
        removed: Vec<String>,
    },
}

/// One persistent property of `object` changed.
#[derive(Clone, Debug)]
pub struct PropertyChangeEvent {
    pub object: ObjectHandle,
    pub index: usize,
    pub change: LiveChange,
}

/// Convert a live change into its JSON-ready record.
///
/// References in the payload become stubs and are reported to `ctx` as
/// dependents, exactly as full serialization does.
pub fn serialize_change(
    ctx: &dyn SerialContext,
    prop: &PropertyDescriptor,
    change: &LiveChange,
) -> ChangeRecord {
    let elements = |values: &[Value]| -> Vec<Json> {
        values
            .iter()
            .map(|v| convert::element_to_json(ctx, prop, v))
            .collect()
    };
    let entries = |values: &BTreeMap<String, Value>| -> Map<String, Json> {
        values
            .iter()
            .map(|(k, v)| (k.clone(), convert::element_to_json(ctx, prop, v)))
            .collect()
    };
    match change {
        LiveChange::Set(value) => ChangeRecord::SetValue {
            value: convert::value_to_json(ctx, prop, value),
        },
        LiveChange::ArrayReplace(values) => ChangeRecord::ArrayReplace {
            value: elements(values),
        },
        LiveChange::ArrayChange { added, removed } => ChangeRecord::ArrayChange {
            added: elements(added),
            removed: elements(removed),
        },
        LiveChange::MapReplace(values) => ChangeRecord::MapReplace {
            value: entries(values),
        },
        LiveChange::MapChange { put, removed } => ChangeRecord::MapChange {
            put: entries(put),
            removed: removed.clone(),
        },
    }
}

/// Pending change records for one object, coalesced per property.
///
/// Applying the coalesced record for a property always has the same effect
/// as applying every stored record for it in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeStore {
    changes: ChangeBundle,
}

impl ChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `record` into whatever is pending for `property`.
    ///
    /// Snapshot records replace what was there. Incremental records are
    /// folded into an earlier snapshot or merged with an earlier
    /// incremental record of the same kind; a kind mismatch keeps the
    /// newer record.
    pub fn store_change(&mut self, property: &str, record: ChangeRecord) {
        let merged = match self.changes.remove(property) {
            None => record,
            Some(existing) => merge(existing, record),
        };
        self.changes.insert(property.to_string(), merged);
    }

    pub fn get(&self, property: &str) -> Option<&ChangeRecord> {
        self.changes.get(property)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn bundle(&self) -> &ChangeBundle {
        &self.changes
    }

    /// Drain every pending record.
    pub fn take(&mut self) -> ChangeBundle {
        std::mem::take(&mut self.changes)
    }
}

fn merge(existing: ChangeRecord, incoming: ChangeRecord) -> ChangeRecord {
    use ChangeRecord::*;

    match (existing, incoming) {
        (_, incoming) if incoming.is_replace() => incoming,

        (ArrayReplace { mut value }, ArrayChange { added, removed }) => {
            apply_array_change(&mut value, added, &removed);
            ArrayReplace { value }
        }
        (SetValue { value: Json::Array(mut value) }, ArrayChange { added, removed }) => {
            apply_array_change(&mut value, added, &removed);
            ArrayReplace { value }
        }
        (
            ArrayChange {
                added: mut pending_added,
                removed: mut pending_removed,
            },
            ArrayChange { added, removed },
        ) => {
            for item in removed {
                match pending_added.iter().rposition(|x| *x == item) {
                    Some(pos) => {
                        pending_added.remove(pos);
                    }
                    None => pending_removed.push(item),
                }
            }
            pending_added.extend(added);
            ArrayChange {
                added: pending_added,
                removed: pending_removed,
            }
        }

        (MapReplace { mut value }, MapChange { put, removed }) => {
            apply_map_change(&mut value, put, &removed);
            MapReplace { value }
        }
        (SetValue { value: Json::Object(mut value) }, MapChange { put, removed }) => {
            apply_map_change(&mut value, put, &removed);
            MapReplace { value }
        }
        (
            MapChange {
                put: mut pending_put,
                removed: mut pending_removed,
            },
            MapChange { put, removed },
        ) => {
            for key in removed {
                pending_put.remove(&key);
                if !pending_removed.contains(&key) {
                    pending_removed.push(key);
                }
            }
            for (key, value) in put {
                pending_removed.retain(|k| *k != key);
                pending_put.insert(key, value);
            }
            MapChange {
                put: pending_put,
                removed: pending_removed,
            }
        }

        (existing, incoming) => {
            debug!(
                existing = existing.type_name(),
                incoming = incoming.type_name(),
                "incompatible change records, keeping the newer one"
            );
            incoming
        }
    }
}

fn apply_array_change(items: &mut Vec<Json>, added: Vec<Json>, removed: &[Json]) {
    for item in removed {
        if let Some(pos) = items.iter().rposition(|x| x == item) {
            items.remove(pos);
        }
    }
    items.extend(added);
}

fn apply_map_change(entries: &mut Map<String, Json>, put: Map<String, Json>, removed: &[String]) {
    for key in removed {
        entries.remove(key);
    }
    entries.extend(put);
}

/// Replay a bundle of change records on a live object.
///
/// Every property write is bracketed by the context's changing-property
/// counter so the context's own watcher ignores it. Records for unknown
/// properties are skipped with a warning.
pub async fn restore_changes(
    ctx: &dyn SerialContext,
    object: &ObjectHandle,
    changes: &ChangeBundle,
) -> SerialResult<()> {
    for (name, record) in changes {
        let Some(prop) = object.descriptor().property(name).cloned() else {
            warn!(uuid = %object.uuid(), class = object.class_name(), property = %name, "change for unknown property, skipping");
            continue;
        };
        match record {
            ChangeRecord::SetValue { value } => {
                let value = convert::value_from_json(ctx, &prop, value).await?;
                apply_value(ctx, object, &prop, value)?;
            }
            ChangeRecord::ArrayReplace { value } => {
                let value = convert::value_from_json(ctx, &prop, &Json::Array(value.clone())).await?;
                apply_value(ctx, object, &prop, value)?;
            }
            ChangeRecord::MapReplace { value } => {
                let value = convert::value_from_json(ctx, &prop, &Json::Object(value.clone())).await?;
                apply_value(ctx, object, &prop, value)?;
            }
            ChangeRecord::ArrayChange { added, removed } => {
                if !matches!(prop.ty(), PropertyType::OrderedCollection(_)) {
                    warn!(uuid = %object.uuid(), property = %name, "array change for a non-list property, skipping");
                    continue;
                }
                let added = elements_from_json(ctx, &prop, added).await?;
                let removed = elements_from_json(ctx, &prop, removed).await?;
                let _guard = ChangingPropertyGuard::new(ctx, object.uuid(), prop.index());
                let list = match object.get_at(prop.index()) {
                    Some(Value::List(list)) => list,
                    _ => {
                        let list = OrderedCollection::new();
                        object.set_at(prop.index(), Value::List(list.clone()))?;
                        list
                    }
                };
                for item in &removed {
                    list.remove_last(item);
                }
                if !added.is_empty() {
                    list.extend(added);
                }
            }
            ChangeRecord::MapChange { put, removed } => {
                if !matches!(prop.ty(), PropertyType::KeyedCollection { .. }) {
                    warn!(uuid = %object.uuid(), property = %name, "map change for a non-map property, skipping");
                    continue;
                }
                let mut entries = BTreeMap::new();
                for (key, json) in put {
                    entries.insert(key.clone(), convert::element_from_json(ctx, &prop, json).await?);
                }
                let _guard = ChangingPropertyGuard::new(ctx, object.uuid(), prop.index());
                let map = match object.get_at(prop.index()) {
                    Some(Value::Map(map)) => map,
                    _ => {
                        let map = KeyedCollection::new();
                        object.set_at(prop.index(), Value::Map(map.clone()))?;
                        map
                    }
                };
                for key in removed {
                    map.remove(key);
                }
                for (key, value) in entries {
                    map.put(key, value);
                }
            }
        }
    }
    Ok(())
}

async fn elements_from_json(
    ctx: &dyn SerialContext,
    prop: &PropertyDescriptor,
    items: &[Json],
) -> SerialResult<Vec<Value>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        values.push(convert::element_from_json(ctx, prop, item).await?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn array_change(added: Vec<Json>, removed: Vec<Json>) -> ChangeRecord {
        ChangeRecord::ArrayChange { added, removed }
    }

    // ---- Coalescing ----

    #[test]
    fn replace_overwrites_anything() {
        let mut store = ChangeStore::new();
        store.store_change("tags", array_change(vec![json!("a")], vec![]));
        store.store_change("tags", ChangeRecord::ArrayReplace { value: vec![json!("z")] });
        assert_eq!(
            store.get("tags"),
            Some(&ChangeRecord::ArrayReplace { value: vec![json!("z")] })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn array_changes_fold_into_snapshots() {
        let mut store = ChangeStore::new();
        store.store_change(
            "tags",
            ChangeRecord::ArrayReplace {
                value: vec![json!("a"), json!("b"), json!("a")],
            },
        );
        store.store_change("tags", array_change(vec![json!("c")], vec![json!("a")]));
        assert_eq!(
            store.get("tags"),
            Some(&ChangeRecord::ArrayReplace {
                value: vec![json!("a"), json!("b"), json!("c")]
            })
        );

        store.store_change("raw", ChangeRecord::SetValue { value: json!([1]) });
        store.store_change("raw", array_change(vec![json!(2)], vec![]));
        assert_eq!(
            store.get("raw"),
            Some(&ChangeRecord::ArrayReplace {
                value: vec![json!(1), json!(2)]
            })
        );
    }

    #[test]
    fn adds_then_removes_collapse_into_one_record() {
        let mut store = ChangeStore::new();
        store.store_change("tags", array_change(vec![json!("a")], vec![]));
        store.store_change("tags", array_change(vec![json!("b")], vec![]));
        store.store_change("tags", array_change(vec![], vec![json!("x")]));
        store.store_change("tags", array_change(vec![], vec![json!("a")]));
        assert_eq!(
            store.get("tags"),
            Some(&array_change(vec![json!("b")], vec![json!("x")]))
        );
    }

    #[test]
    fn map_changes_merge() {
        let mut store = ChangeStore::new();
        let put = |k: &str, v: Json| {
            let mut m = Map::new();
            m.insert(k.into(), v);
            m
        };
        store.store_change(
            "meta",
            ChangeRecord::MapChange {
                put: put("a", json!(1)),
                removed: vec!["b".into()],
            },
        );
        store.store_change(
            "meta",
            ChangeRecord::MapChange {
                put: put("b", json!(2)),
                removed: vec!["a".into()],
            },
        );
        assert_eq!(
            store.get("meta"),
            Some(&ChangeRecord::MapChange {
                put: put("b", json!(2)),
                removed: vec!["a".into()],
            })
        );

        store.store_change("meta", ChangeRecord::MapReplace { value: put("z", json!(0)) });
        store.store_change(
            "meta",
            ChangeRecord::MapChange {
                put: put("y", json!(1)),
                removed: vec!["z".into()],
            },
        );
        assert_eq!(
            store.get("meta"),
            Some(&ChangeRecord::MapReplace { value: put("y", json!(1)) })
        );
    }

    #[test]
    fn mismatched_kinds_keep_the_newer_record() {
        let mut store = ChangeStore::new();
        store.store_change("p", ChangeRecord::SetValue { value: json!(3) });
        let change = array_change(vec![json!(1)], vec![]);
        store.store_change("p", change.clone());
        assert_eq!(store.get("p"), Some(&change));
    }

    #[test]
    fn take_drains_the_store() {
        let mut store = ChangeStore::new();
        store.store_change("a", ChangeRecord::SetValue { value: json!(1) });
        store.store_change("b", ChangeRecord::SetValue { value: json!(2) });
        let bundle = store.take();
        assert_eq!(bundle.len(), 2);
        assert!(store.is_empty());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(i64),
        Remove(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0..4i64).prop_map(Op::Add), (0..4i64).prop_map(Op::Remove)]
    }

    fn apply_sequentially(base: &[i64], ops: &[Op]) -> Vec<Json> {
        let mut items: Vec<Json> = base.iter().map(|v| json!(v)).collect();
        for op in ops {
            match op {
                Op::Add(v) => items.push(json!(v)),
                Op::Remove(v) => {
                    if let Some(pos) = items.iter().rposition(|x| *x == json!(v)) {
                        items.remove(pos);
                    }
                }
            }
        }
        items
    }

    fn record_for(op: &Op) -> ChangeRecord {
        match op {
            Op::Add(v) => array_change(vec![json!(v)], vec![]),
            Op::Remove(v) => array_change(vec![], vec![json!(v)]),
        }
    }

    proptest! {
        #[test]
        fn coalesced_array_changes_match_sequential_application(
            base in proptest::collection::vec(0..4i64, 0..6),
            ops in proptest::collection::vec(op(), 0..12),
        ) {
            let mut store = ChangeStore::new();
            for op in &ops {
                store.store_change("items", record_for(op));
            }
            let expected = apply_sequentially(&base, &ops);
            let mut actual: Vec<Json> = base.iter().map(|v| json!(v)).collect();
            match store.take().remove("items") {
                Some(ChangeRecord::ArrayChange { added, removed }) => {
                    apply_array_change(&mut actual, added, &removed);
                }
                None => {}
                Some(other) => prop_assert!(false, "unexpected record {:?}", other),
            }
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn coalescing_onto_a_snapshot_matches_sequential_application(
            base in proptest::collection::vec(0..4i64, 0..6),
            ops in proptest::collection::vec(op(), 0..12),
        ) {
            let mut store = ChangeStore::new();
            store.store_change(
                "items",
                ChangeRecord::ArrayReplace { value: base.iter().map(|v| json!(v)).collect() },
            );
            for op in &ops {
                store.store_change("items", record_for(op));
            }
            let expected = apply_sequentially(&base, &ops);
            prop_assert_eq!(
                store.get("items"),
                Some(&ChangeRecord::ArrayReplace { value: expected })
            );
        }
    }

    // ---- Serializing and restoring ----

    #[test]
    fn serialized_changes_stub_references() {
        let Fixture { registry, ctx, .. } = fixture();
        let page = registry.new_object("Page").unwrap();
        let person = registry.new_object("Person").unwrap();
        let prop = page.descriptor().property("refs").unwrap().clone();
        let record = serialize_change(
            &ctx,
            &prop,
            &LiveChange::ArrayChange {
                added: vec![Value::Object(person.clone())],
                removed: vec![],
            },
        );
        assert_eq!(
            record,
            array_change(vec![tether_types::fields::stub(person.uuid(), "Person")], vec![])
        );
        assert!(ctx.take_dependents()[0].ptr_eq(&person));
    }

    #[tokio::test]
    async fn restore_applies_records_under_the_changing_bracket() {
        let Fixture { registry, ctx, .. } = fixture();
        let ctx = Arc::new(ctx);
        let page = registry.new_object("Page").unwrap();
        let tags = page.list("tags").unwrap();
        tags.extend(vec!["a".into(), "b".into(), "a".into()]);

        let uuid = page.uuid();
        let index = page.descriptor().property("tags").unwrap().index();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (observed, observer_ctx) = (Arc::clone(&seen), Arc::clone(&ctx));
        tags.on_change(move |_| {
            observed
                .lock()
                .unwrap()
                .push(observer_ctx.is_changing_property(uuid, index));
        });

        let mut bundle = ChangeBundle::new();
        bundle.insert("title".into(), ChangeRecord::SetValue { value: json!("New") });
        bundle.insert("tags".into(), array_change(vec![json!("c")], vec![json!("a")]));
        bundle.insert(
            "meta".into(),
            ChangeRecord::MapChange {
                put: [("k".to_string(), json!(1))].into_iter().collect(),
                removed: vec![],
            },
        );
        bundle.insert("nonexistent".into(), ChangeRecord::SetValue { value: json!(1) });
        restore_changes(ctx.as_ref(), &page, &bundle).await.unwrap();

        assert_eq!(page.get("title").unwrap(), Value::Text("New".into()));
        assert_eq!(
            tags.to_vec(),
            vec![Value::Text("a".into()), Value::Text("b".into()), Value::Text("c".into())]
        );
        assert_eq!(page.map("meta").unwrap().get("k"), Some(Value::Integer(1)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|changing| *changing));
        assert!(!ctx.is_changing_property(uuid, index));
    }
}
