use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as Json;
use tether_model::{ClassRegistry, ObjectHandle};
use tether_types::fields;

use crate::context::SerialContext;
use crate::error::{SerialError, SerialResult};
use crate::serializer::TypeSerializer;

/// Lazily built serializers, one per class, plus explicitly named ones.
pub struct SerializerCache {
    classes: Arc<ClassRegistry>,
    by_class: RwLock<HashMap<String, Arc<TypeSerializer>>>,
    named: RwLock<HashMap<String, Arc<TypeSerializer>>>,
}

impl SerializerCache {
    pub fn new(classes: Arc<ClassRegistry>) -> Self {
        Self {
            classes,
            by_class: RwLock::new(HashMap::new()),
            named: RwLock::new(HashMap::new()),
        }
    }

    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    /// The serializer of a registered class.
    pub fn for_class(&self, class: &str) -> SerialResult<Arc<TypeSerializer>> {
        if let Some(serializer) = self
            .by_class
            .read()
            .expect("serializer cache lock poisoned")
            .get(class)
        {
            return Ok(Arc::clone(serializer));
        }
        let descriptor = self
            .classes
            .get(class)
            .ok_or_else(|| SerialError::UnknownClass(class.to_string()))?;
        let mut by_class = self.by_class.write().expect("serializer cache lock poisoned");
        let serializer = by_class
            .entry(class.to_string())
            .or_insert_with(|| Arc::new(TypeSerializer::new(descriptor)));
        Ok(Arc::clone(serializer))
    }

    /// The serializer for an object's own class.
    pub fn for_object(&self, object: &ObjectHandle) -> Arc<TypeSerializer> {
        if let Some(serializer) = self
            .by_class
            .read()
            .expect("serializer cache lock poisoned")
            .get(object.class_name())
        {
            return Arc::clone(serializer);
        }
        let mut by_class = self.by_class.write().expect("serializer cache lock poisoned");
        let serializer = by_class
            .entry(object.class_name().to_string())
            .or_insert_with(|| Arc::new(TypeSerializer::new(Arc::clone(object.descriptor()))));
        Arc::clone(serializer)
    }

    /// Register a serializer that reference shapes can name explicitly.
    pub fn register_named(&self, name: impl Into<String>, serializer: TypeSerializer) {
        self.named
            .write()
            .expect("serializer cache lock poisoned")
            .insert(name.into(), Arc::new(serializer));
    }

    pub fn named(&self, name: &str) -> Option<Arc<TypeSerializer>> {
        self.named
            .read()
            .expect("serializer cache lock poisoned")
            .get(name)
            .cloned()
    }

    /// Deserialize a full document, picking the serializer from its
    /// `_classname`.
    pub async fn from_json(
        &self,
        ctx: &dyn SerialContext,
        json: &Json,
        object: Option<ObjectHandle>,
    ) -> SerialResult<ObjectHandle> {
        let class = match (fields::classname_of(json), &object) {
            (Some(class), _) => class.to_string(),
            (None, Some(object)) => object.class_name().to_string(),
            (None, None) => return Err(SerialError::UnknownClass(String::new())),
        };
        let serializer = self.for_class(&class)?;
        serializer.from_json(ctx, json, object).await
    }
}
