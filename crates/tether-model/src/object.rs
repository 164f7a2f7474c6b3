use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use tether_types::ObjectUuid;

use crate::descriptor::{PropertyDescriptor, PropertyType, TypeDescriptor, ValueShape};
use crate::error::{MethodError, ModelError, ModelResult};
use crate::keyed::KeyedCollection;
use crate::listener::{ListenerId, ListenerSet};
use crate::method::{EndpointLink, MethodFuture};
use crate::ordered::OrderedCollection;
use crate::value::Value;

/// A property of an object was assigned a new value.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    pub object: ObjectHandle,
    pub index: usize,
    pub old: Value,
    pub new: Value,
}

struct PersistentObject {
    uuid: ObjectUuid,
    descriptor: Arc<TypeDescriptor>,
    values: RwLock<Vec<Value>>,
    listeners: ListenerSet<PropertyChange>,
    endpoint: OnceLock<EndpointLink>,
    loaded: AtomicBool,
}

/// Shared handle on one live, identified object.
///
/// Handles compare by identity. Property slots are typed by the class's
/// [`TypeDescriptor`]; assignments that change a slot notify property
/// listeners after the new value is in place.
#[derive(Clone)]
pub struct ObjectHandle(Arc<PersistentObject>);

/// Non-owning counterpart of [`ObjectHandle`], for listeners that must not
/// keep their object alive.
#[derive(Clone)]
pub struct WeakObjectHandle(Weak<PersistentObject>);

impl ObjectHandle {
    /// Construct an instance with every property at its initial value.
    pub fn new(descriptor: Arc<TypeDescriptor>, uuid: ObjectUuid) -> Self {
        let values = descriptor
            .properties()
            .iter()
            .map(PropertyDescriptor::initial_value)
            .collect();
        Self(Arc::new(PersistentObject {
            uuid,
            descriptor,
            values: RwLock::new(values),
            listeners: ListenerSet::new(),
            endpoint: OnceLock::new(),
            loaded: AtomicBool::new(false),
        }))
    }

    pub fn uuid(&self) -> ObjectUuid {
        self.0.uuid
    }

    pub fn class_name(&self) -> &str {
        self.0.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.0.descriptor
    }

    pub fn get(&self, name: &str) -> ModelResult<Value> {
        let index = self.index_of(name)?;
        Ok(self.read()[index].clone())
    }

    pub fn get_at(&self, index: usize) -> Option<Value> {
        self.read().get(index).cloned()
    }

    /// The ordered collection held by a list property.
    pub fn list(&self, name: &str) -> ModelResult<OrderedCollection> {
        match self.get(name)? {
            Value::List(list) => Ok(list),
            other => Err(self.mismatch(name, &other)),
        }
    }

    /// The keyed collection held by a map property.
    pub fn map(&self, name: &str) -> ModelResult<KeyedCollection> {
        match self.get(name)? {
            Value::Map(map) => Ok(map),
            other => Err(self.mismatch(name, &other)),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let index = self.index_of(name)?;
        self.set_at(index, value.into())
    }

    /// Assign a property slot. Assigning an equal value is a no-op.
    pub fn set_at(&self, index: usize, value: Value) -> ModelResult<()> {
        let prop = self
            .0
            .descriptor
            .property_at(index)
            .ok_or_else(|| ModelError::PropertyIndex {
                class: self.class_name().to_string(),
                index,
            })?;
        if !assignable(prop.ty(), &value) {
            return Err(self.mismatch(prop.name(), &value));
        }
        let old = {
            let mut values = self.0.values.write().expect("object lock poisoned");
            if values[index] == value {
                return Ok(());
            }
            std::mem::replace(&mut values[index], value.clone())
        };
        self.0.listeners.emit(&PropertyChange {
            object: self.clone(),
            index,
            old,
            new: value,
        });
        Ok(())
    }

    pub fn on_property_change<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&PropertyChange) + Send + Sync + 'static,
    {
        self.0.listeners.add(f)
    }

    pub fn remove_property_listener(&self, id: ListenerId) -> bool {
        self.0.listeners.remove(id)
    }

    pub fn property_listener_count(&self) -> usize {
        self.0.listeners.len()
    }

    /// Associate the object with the endpoint that owns it. The association
    /// is set once; repeating it with the same endpoint is accepted.
    pub fn attach_endpoint(&self, link: EndpointLink) -> ModelResult<()> {
        let id = link.endpoint_id();
        let current = self.0.endpoint.get_or_init(|| link);
        if current.endpoint_id() == id {
            Ok(())
        } else {
            Err(ModelError::EndpointMismatch { uuid: self.uuid() })
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointLink> {
        self.0.endpoint.get()
    }

    /// Returns `true` once the object's data has been fully populated.
    pub fn is_loaded(&self) -> bool {
        self.0.loaded.load(Ordering::Acquire)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.0.loaded.store(loaded, Ordering::Release);
    }

    /// Invoke a method. Remote methods of a proxied class are forwarded to
    /// the owning endpoint when one is attached and alive; everything else
    /// runs locally.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> MethodFuture {
        let descriptor = &self.0.descriptor;
        let Some(m) = descriptor.method(method) else {
            return self.unknown_method(method);
        };
        if m.remote && descriptor.is_proxied() {
            if let Some(forwarder) = self.endpoint().and_then(EndpointLink::forwarder) {
                return forwarder.forward(self.clone(), method.to_string(), args);
            }
        }
        (m.handler)(self.clone(), args)
    }

    /// Invoke a method in this process regardless of ownership.
    pub fn invoke_local(&self, method: &str, args: Vec<Value>) -> MethodFuture {
        match self.0.descriptor.method(method) {
            Some(m) => (m.handler)(self.clone(), args),
            None => self.unknown_method(method),
        }
    }

    pub fn downgrade(&self) -> WeakObjectHandle {
        WeakObjectHandle(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Value>> {
        self.0.values.read().expect("object lock poisoned")
    }

    fn index_of(&self, name: &str) -> ModelResult<usize> {
        self.0
            .descriptor
            .property(name)
            .map(PropertyDescriptor::index)
            .ok_or_else(|| ModelError::UnknownProperty {
                class: self.class_name().to_string(),
                property: name.to_string(),
            })
    }

    fn mismatch(&self, property: &str, value: &Value) -> ModelError {
        ModelError::TypeMismatch {
            class: self.class_name().to_string(),
            property: property.to_string(),
            found: value.type_name(),
        }
    }

    fn unknown_method(&self, method: &str) -> MethodFuture {
        let err = MethodError::UnknownMethod {
            class: self.class_name().to_string(),
            method: method.to_string(),
        };
        Box::pin(async move { Err(err) })
    }
}

fn assignable(ty: &PropertyType, value: &Value) -> bool {
    match ty {
        PropertyType::OrderedCollection(_) => matches!(value, Value::List(_)),
        PropertyType::KeyedCollection { .. } => matches!(value, Value::Map(_)),
        PropertyType::Scalar(ValueShape::Reference(_)) => {
            matches!(value, Value::Object(_) | Value::Null)
        }
        PropertyType::Scalar(ValueShape::Date) => matches!(value, Value::Date(_) | Value::Null),
        PropertyType::Scalar(_) => !matches!(
            value,
            Value::Object(_) | Value::List(_) | Value::Map(_)
        ),
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid().hash(state);
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({}, {})", self.class_name(), self.uuid().short_id())
    }
}

impl WeakObjectHandle {
    pub fn upgrade(&self) -> Option<ObjectHandle> {
        self.0.upgrade().map(ObjectHandle)
    }
}

impl fmt::Debug for WeakObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakObjectHandle(..)")
    }
}
