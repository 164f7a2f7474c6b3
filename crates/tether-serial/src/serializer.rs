use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tether_model::{
    ModelError, ObjectHandle, PropertyDescriptor, TypeDescriptor, Value,
};
use tether_types::{fields, ObjectUuid, CLASSNAME_FIELD, UUID_FIELD};
use tracing::warn;

use crate::context::{ChangingPropertyGuard, SerialContext};
use crate::convert;
use crate::error::{SerialError, SerialResult};
use crate::watch::{self, ChangeCallback, WatchGuard};

/// Boxed future returned by recursive deserialization.
pub type SerialFuture<'a, T> = Pin<Box<dyn Future<Output = SerialResult<T>> + Send + 'a>>;

/// Converts instances of one class to and from the persisted shape.
///
/// Only persistent properties take part. A serializer built with
/// [`subset`](Self::subset) covers a chosen slice of them, which is how
/// reference shapes name a reduced or alternate representation.
pub struct TypeSerializer {
    descriptor: Arc<TypeDescriptor>,
    properties: Vec<PropertyDescriptor>,
}

impl fmt::Debug for TypeSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSerializer")
            .field("class", &self.class_name())
            .field(
                "properties",
                &self.properties.iter().map(PropertyDescriptor::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TypeSerializer {
    pub fn new(descriptor: Arc<TypeDescriptor>) -> Self {
        let properties = descriptor.persistent_properties().cloned().collect();
        Self {
            descriptor,
            properties,
        }
    }

    /// A serializer covering only the named properties.
    pub fn subset(descriptor: Arc<TypeDescriptor>, names: &[&str]) -> SerialResult<Self> {
        let properties = names
            .iter()
            .map(|name| {
                descriptor
                    .property(name)
                    .cloned()
                    .ok_or_else(|| ModelError::UnknownProperty {
                        class: descriptor.name().to_string(),
                        property: name.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            descriptor,
            properties,
        })
    }

    pub fn class_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Serialize `object`, merging into `existing` when given.
    ///
    /// The result always carries the object's own `_classname` and `_uuid`.
    /// Referenced objects are written as stubs and reported to the context
    /// as dependents unless their shape embeds them.
    pub fn to_json(
        &self,
        ctx: &dyn SerialContext,
        object: &ObjectHandle,
        existing: Option<Json>,
    ) -> SerialResult<Json> {
        self.to_json_in(ctx, object, existing, &mut Vec::new())
    }

    pub(crate) fn to_json_in(
        &self,
        ctx: &dyn SerialContext,
        object: &ObjectHandle,
        existing: Option<Json>,
        embedding: &mut Vec<ObjectUuid>,
    ) -> SerialResult<Json> {
        if !object.descriptor().is_a(self.class_name()) {
            return Err(SerialError::ClassMismatch {
                expected: self.class_name().to_string(),
                found: object.class_name().to_string(),
            });
        }
        let mut map = match existing {
            None => Map::new(),
            Some(Json::Object(map)) => map,
            Some(other) => return Err(SerialError::NotAnObject(other.to_string())),
        };
        map.insert(CLASSNAME_FIELD.into(), Json::String(object.class_name().into()));
        map.insert(UUID_FIELD.into(), Json::String(object.uuid().to_string()));

        embedding.push(object.uuid());
        for prop in &self.properties {
            let value = object.get_at(prop.index()).unwrap_or_default();
            let json = convert::value_to_json_in(ctx, prop, &value, embedding);
            map.insert(prop.name().to_string(), json);
        }
        embedding.pop();
        Ok(Json::Object(map))
    }

    /// Populate an object from a document.
    ///
    /// Without `object`, the instance is obtained from the registry by the
    /// document's `_classname` and `_uuid`, reusing any placeholder. Only
    /// properties present in the document are touched; collection
    /// properties keep their instance and have their contents replaced.
    /// The object's load episode is settled either way.
    pub fn from_json<'a>(
        &'a self,
        ctx: &'a dyn SerialContext,
        json: &'a Json,
        object: Option<ObjectHandle>,
    ) -> SerialFuture<'a, ObjectHandle> {
        Box::pin(async move {
            let map = json
                .as_object()
                .ok_or_else(|| SerialError::NotAnObject(json.to_string()))?;
            let class = match (fields::classname_of(json), &object) {
                (Some(class), _) => class.to_string(),
                (None, Some(object)) => object.class_name().to_string(),
                (None, None) => self.class_name().to_string(),
            };
            let descriptor = ctx
                .serializers()
                .classes()
                .get(&class)
                .ok_or_else(|| SerialError::UnknownClass(class.clone()))?;
            if !descriptor.is_a(self.class_name()) {
                return Err(SerialError::ClassMismatch {
                    expected: self.class_name().to_string(),
                    found: class,
                });
            }

            let object = match object {
                Some(object) if object.class_name() != class => {
                    return Err(SerialError::ClassMismatch {
                        expected: object.class_name().to_string(),
                        found: class,
                    })
                }
                Some(object) => object,
                None => {
                    let uuid = fields::uuid_of(json)?;
                    ctx.registry().obtain_object(&class, uuid)?
                }
            };

            match self.populate(ctx, &object, map).await {
                Ok(()) => Ok(ctx.registry().set_object_complete(&object, None)?),
                Err(e) => {
                    if let Err(inner) = ctx
                        .registry()
                        .set_object_complete(&object, Some(e.to_string()))
                    {
                        warn!(uuid = %object.uuid(), error = %inner, "could not record failed load");
                    }
                    Err(e)
                }
            }
        })
    }

    async fn populate(
        &self,
        ctx: &dyn SerialContext,
        object: &ObjectHandle,
        map: &Map<String, Json>,
    ) -> SerialResult<()> {
        for prop in &self.properties {
            let Some(json) = map.get(prop.name()) else {
                continue;
            };
            let value = convert::value_from_json(ctx, prop, json).await?;
            apply_value(ctx, object, prop, value)?;
        }
        Ok(())
    }

    /// Serialize one property value by name.
    pub fn to_json_value(
        &self,
        ctx: &dyn SerialContext,
        property: &str,
        value: &Value,
    ) -> SerialResult<Json> {
        let prop = self.require(property)?;
        Ok(convert::value_to_json(ctx, prop, value))
    }

    /// Deserialize one property value by name.
    pub async fn from_json_value(
        &self,
        ctx: &dyn SerialContext,
        property: &str,
        json: &Json,
    ) -> SerialResult<Value> {
        let prop = self.require(property)?;
        convert::value_from_json(ctx, prop, json).await
    }

    /// Report every persistent mutation of `object`, including mutations of
    /// the contents of its collection properties, until the guard drops.
    pub fn watch_for_changes(&self, object: &ObjectHandle, callback: ChangeCallback) -> WatchGuard {
        watch::watch_object(&self.properties, object, callback)
    }

    pub fn unwatch_for_changes(&self, guard: WatchGuard) {
        guard.release();
    }

    fn require(&self, property: &str) -> SerialResult<&PropertyDescriptor> {
        self.property(property).ok_or_else(|| {
            SerialError::Model(ModelError::UnknownProperty {
                class: self.class_name().to_string(),
                property: property.to_string(),
            })
        })
    }
}

/// Store a deserialized value in its slot, under the context's
/// changing-property bracket.
///
/// A null for a non-nullable property falls back to the property's initial
/// value. Collection slots keep their instance.
pub(crate) fn apply_value(
    ctx: &dyn SerialContext,
    object: &ObjectHandle,
    prop: &PropertyDescriptor,
    value: Value,
) -> SerialResult<()> {
    let _guard = ChangingPropertyGuard::new(ctx, object.uuid(), prop.index());
    let value = if value.is_null() && !prop.is_nullable() {
        prop.initial_value()
    } else {
        value
    };
    match (object.get_at(prop.index()), value) {
        (Some(Value::List(current)), Value::List(incoming)) => {
            let items = incoming.to_vec();
            if current.to_vec() != items {
                current.replace_all(items);
            }
        }
        (Some(Value::Map(current)), Value::Map(incoming)) => {
            let entries = incoming.to_map();
            if current.to_map() != entries {
                current.replace_all(entries);
            }
        }
        (_, value) => object.set_at(prop.index(), value)?,
    }
    Ok(())
}
