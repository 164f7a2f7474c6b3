//! Property-level conversion between live values and JSON.
//!
//! These functions follow a property's declared [`PropertyType`]: scalars
//! by their [`ValueShape`], collections element by element. References are
//! written as stubs (and handed to the context as dependents) unless the
//! shape embeds them.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use tether_model::{
    KeyedCollection, ObjectHandle, OrderedCollection, PropertyDescriptor, PropertyType,
    ReferenceShape, Value, ValueShape,
};
use tether_types::{fields, ObjectUuid, QUERY_FIELD};
use tracing::warn;

use crate::coerce;
use crate::context::SerialContext;
use crate::error::SerialResult;

/// Write a property value.
pub fn value_to_json(ctx: &dyn SerialContext, prop: &PropertyDescriptor, value: &Value) -> Json {
    value_to_json_in(ctx, prop, value, &mut Vec::new())
}

/// Write one element of a collection property (or a scalar value).
pub fn element_to_json(ctx: &dyn SerialContext, prop: &PropertyDescriptor, value: &Value) -> Json {
    shape_to_json(ctx, prop.name(), prop.ty().element_shape(), value, &mut Vec::new())
}

pub(crate) fn value_to_json_in(
    ctx: &dyn SerialContext,
    prop: &PropertyDescriptor,
    value: &Value,
    embedding: &mut Vec<ObjectUuid>,
) -> Json {
    match (prop.ty(), value) {
        (_, Value::Null) => Json::Null,
        (PropertyType::Scalar(shape), value) => {
            shape_to_json(ctx, prop.name(), shape, value, embedding)
        }
        (PropertyType::OrderedCollection(shape), Value::List(list)) => Json::Array(
            list.to_vec()
                .iter()
                .map(|item| shape_to_json(ctx, prop.name(), shape, item, embedding))
                .collect(),
        ),
        (PropertyType::KeyedCollection { value: shape, .. }, Value::Map(map)) => Json::Object(
            map.to_map()
                .iter()
                .map(|(k, v)| (k.clone(), shape_to_json(ctx, prop.name(), shape, v, embedding)))
                .collect(),
        ),
        (_, other) => {
            warn!(
                property = prop.name(),
                found = other.type_name(),
                "collection property holds a non-collection, using null"
            );
            Json::Null
        }
    }
}

fn shape_to_json(
    ctx: &dyn SerialContext,
    property: &str,
    shape: &ValueShape,
    value: &Value,
    embedding: &mut Vec<ObjectUuid>,
) -> Json {
    match shape {
        ValueShape::Primitive(_) => coerce::primitive_to_json(value, property),
        ValueShape::Date => coerce::date_to_json(value, property),
        ValueShape::Embedded => match value {
            Value::Json(json) => json.clone(),
            other => coerce::primitive_to_json(other, property),
        },
        ValueShape::Reference(reference) => match value {
            Value::Null => Json::Null,
            Value::Object(object) => reference_to_json(ctx, property, reference, object, embedding),
            other => {
                warn!(property, found = other.type_name(), "expected an object reference, using null");
                Json::Null
            }
        },
    }
}

fn reference_to_json(
    ctx: &dyn SerialContext,
    property: &str,
    reference: &ReferenceShape,
    object: &ObjectHandle,
    embedding: &mut Vec<ObjectUuid>,
) -> Json {
    let serializer = match &reference.serializer {
        Some(name) => match ctx.serializers().named(name) {
            Some(serializer) => serializer,
            None => {
                warn!(property, serializer = %name, "no serializer registered under this name, using null");
                return Json::Null;
            }
        },
        None => ctx.serializers().for_object(object),
    };
    if !reference.embed || embedding.contains(&object.uuid()) {
        ctx.put_dependent_object(object);
        return fields::stub(object.uuid(), object.class_name());
    }
    match serializer.to_json_in(ctx, object, None, embedding) {
        Ok(json) => json,
        Err(e) => {
            warn!(property, uuid = %object.uuid(), error = %e, "embedded object failed to serialize, using null");
            Json::Null
        }
    }
}

/// Read a property value.
pub async fn value_from_json(
    ctx: &dyn SerialContext,
    prop: &PropertyDescriptor,
    json: &Json,
) -> SerialResult<Value> {
    match prop.ty() {
        PropertyType::Scalar(shape) => Ok(shape_from_json(ctx, prop.name(), shape, json).await),
        PropertyType::OrderedCollection(shape) => {
            let items: &[Json] = match json {
                Json::Array(items) => items.as_slice(),
                Json::Null => &[],
                other => {
                    warn!(property = prop.name(), value = %other, "expected an array, using an empty list");
                    &[]
                }
            };
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(shape_from_json(ctx, prop.name(), shape, item).await);
            }
            Ok(Value::List(OrderedCollection::from_values(values)))
        }
        PropertyType::KeyedCollection { key, value: shape } => {
            let empty = Map::new();
            let entries = match json {
                Json::Object(entries) => entries,
                Json::Null => &empty,
                other => {
                    warn!(property = prop.name(), value = %other, "expected an object, using an empty map");
                    &empty
                }
            };
            let mut values = BTreeMap::new();
            for (k, v) in entries {
                if !coerce::key_is_valid(key.as_ref(), k) {
                    warn!(property = prop.name(), key = %k, "key does not match declared type, skipping");
                    continue;
                }
                values.insert(k.clone(), shape_from_json(ctx, prop.name(), shape, v).await);
            }
            Ok(Value::Map(KeyedCollection::from_entries(values)))
        }
    }
}

/// Read one element of a collection property (or a scalar value).
pub async fn element_from_json(
    ctx: &dyn SerialContext,
    prop: &PropertyDescriptor,
    json: &Json,
) -> SerialResult<Value> {
    Ok(shape_from_json(ctx, prop.name(), prop.ty().element_shape(), json).await)
}

/// Malformed input never fails the conversion; it reads as null.
async fn shape_from_json(
    ctx: &dyn SerialContext,
    property: &str,
    shape: &ValueShape,
    json: &Json,
) -> Value {
    if json.is_null() {
        return Value::Null;
    }
    match shape {
        ValueShape::Primitive(check) => coerce::primitive_from_json(check.as_ref(), json, property),
        ValueShape::Date => coerce::date_from_json(json, property),
        ValueShape::Embedded => Value::Json(json.clone()),
        ValueShape::Reference(reference) => {
            match reference_from_json(ctx, property, reference, json).await {
                Some(object) => Value::Object(object),
                None => Value::Null,
            }
        }
    }
}

async fn reference_from_json(
    ctx: &dyn SerialContext,
    property: &str,
    reference: &ReferenceShape,
    json: &Json,
) -> Option<ObjectHandle> {
    let object = if let Some(query) = json.get(QUERY_FIELD) {
        match ctx.resolve_query(query).await {
            Ok(Some(object)) => Some(object),
            Ok(None) => {
                warn!(property, query = %query, "query reference matched nothing, using null");
                None
            }
            Err(e) => {
                warn!(property, query = %query, error = %e, "query reference failed, using null");
                None
            }
        }
    } else if let Some(text) = json.as_str() {
        match text.parse::<ObjectUuid>() {
            Ok(uuid) => resolve(ctx, property, uuid, reference.class.as_deref()).await,
            Err(_) => {
                warn!(property, value = %text, "reference is not a uuid, using null");
                None
            }
        }
    } else if fields::is_stub(json) {
        match fields::uuid_of(json) {
            Ok(uuid) => resolve(ctx, property, uuid, fields::classname_of(json)).await,
            Err(e) => {
                warn!(property, error = %e, "malformed reference stub, using null");
                None
            }
        }
    } else if json.is_object() {
        embedded_from_json(ctx, property, reference, json).await
    } else {
        warn!(property, value = %json, "unrecognized reference, using null");
        None
    };

    match (object, &reference.class) {
        (Some(object), Some(class)) if !object.descriptor().is_a(class) => {
            warn!(
                property,
                uuid = %object.uuid(),
                expected = %class,
                found = object.class_name(),
                "referenced object has the wrong class, using null"
            );
            None
        }
        (object, _) => object,
    }
}

/// Deserialize an embedded document. A document that cannot be built
/// (unknown class, missing identity) reads as null; the enclosing object
/// still loads.
async fn embedded_from_json(
    ctx: &dyn SerialContext,
    property: &str,
    reference: &ReferenceShape,
    json: &Json,
) -> Option<ObjectHandle> {
    let class = fields::classname_of(json).or(reference.class.as_deref());
    let serializer = match (&reference.serializer, class) {
        (Some(name), _) => match ctx.serializers().named(name) {
            Some(serializer) => serializer,
            None => {
                warn!(property, serializer = %name, "no serializer registered under this name, using null");
                return None;
            }
        },
        (None, Some(class)) => match ctx.serializers().for_class(class) {
            Ok(serializer) => serializer,
            Err(e) => {
                warn!(property, class, uuid = ?fields::uuid_of(json).ok(), error = %e, "embedded object has no serializer, using null");
                return None;
            }
        },
        (None, None) => {
            warn!(property, uuid = ?fields::uuid_of(json).ok(), "embedded object names no class, using null");
            return None;
        }
    };
    match serializer.from_json(ctx, json, None).await {
        Ok(object) => Some(object),
        Err(e) => {
            warn!(
                property,
                class = class.unwrap_or(serializer.class_name()),
                uuid = ?fields::uuid_of(json).ok(),
                error = %e,
                "embedded object failed to load, using null"
            );
            None
        }
    }
}

async fn resolve(
    ctx: &dyn SerialContext,
    property: &str,
    uuid: ObjectUuid,
    class: Option<&str>,
) -> Option<ObjectHandle> {
    match ctx.resolve_reference(uuid, class).await {
        Ok(Some(object)) => Some(object),
        Ok(None) => {
            warn!(property, uuid = %uuid, "reference did not resolve, using null");
            None
        }
        Err(e) => {
            warn!(property, uuid = %uuid, error = %e, "reference did not resolve, using null");
            None
        }
    }
}
