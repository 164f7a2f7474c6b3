use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

use tether_types::ObjectUuid;

use crate::descriptor::{LoadCompleteHook, MethodDescriptor, PropertyDescriptor, TypeDescriptor};
use crate::error::{MethodError, ModelError, ModelResult};
use crate::method::handler;
use crate::object::ObjectHandle;
use crate::value::Value;

type Refinement = Box<dyn FnOnce(&mut PropertyDescriptor)>;

/// Declarative description of a class, turned into a [`TypeDescriptor`]
/// by [`ClassRegistry::register`].
pub struct TypeBuilder {
    name: String,
    parent: Option<String>,
    properties: Vec<PropertyDescriptor>,
    refinements: Vec<(String, Refinement)>,
    methods: Vec<MethodDescriptor>,
    proxied: bool,
    load_complete: Option<LoadCompleteHook>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            properties: Vec::new(),
            refinements: Vec::new(),
            methods: Vec::new(),
            proxied: false,
            load_complete: None,
        }
    }

    /// Inherit properties, methods and markers from a registered class.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Adjust an inherited property (default value, persistence, nullability).
    /// Its name and position are kept.
    pub fn refine<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(PropertyDescriptor) -> PropertyDescriptor + 'static,
    {
        let refinement: Refinement = Box::new(move |prop: &mut PropertyDescriptor| {
            let refined = f(prop.clone());
            *prop = refined;
        });
        self.refinements.push((name.into(), refinement));
        self
    }

    /// A method callable only in this process.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ObjectHandle, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.methods.push(MethodDescriptor {
            name: name.into(),
            remote: false,
            handler: handler(f),
        });
        self
    }

    /// A method a peer may invoke.
    pub fn remote_method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ObjectHandle, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.methods.push(MethodDescriptor {
            name: name.into(),
            remote: true,
            handler: handler(f),
        });
        self
    }

    /// Forward remote methods of peer-owned instances to their owner.
    pub fn proxied(mut self) -> Self {
        self.proxied = true;
        self
    }

    pub fn on_data_load_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&ObjectHandle) + Send + Sync + 'static,
    {
        self.load_complete = Some(Arc::new(f));
        self
    }

    fn build(self, parent: Option<&TypeDescriptor>) -> ModelResult<TypeDescriptor> {
        let mut properties = parent.map(|p| p.properties.clone()).unwrap_or_default();
        let mut methods: BTreeMap<String, MethodDescriptor> =
            parent.map(|p| p.methods.clone()).unwrap_or_default();
        let mut ancestry = vec![self.name.clone()];
        if let Some(p) = parent {
            ancestry.extend(p.ancestry.iter().cloned());
        }

        for (name, refine) in self.refinements {
            let prop = properties
                .iter_mut()
                .find(|p| p.name() == name)
                .ok_or_else(|| ModelError::UnknownProperty {
                    class: self.name.clone(),
                    property: name.clone(),
                })?;
            let index = prop.index();
            let original_name = prop.name().to_string();
            refine(prop);
            if prop.name() != original_name {
                return Err(ModelError::UnknownProperty {
                    class: self.name,
                    property: prop.name().to_string(),
                });
            }
            prop.set_index(index);
        }

        for mut prop in self.properties {
            if properties.iter().any(|p| p.name() == prop.name()) {
                return Err(ModelError::DuplicateProperty {
                    class: self.name,
                    property: prop.name().to_string(),
                });
            }
            prop.set_index(properties.len());
            properties.push(prop);
        }

        for method in self.methods {
            methods.insert(method.name.clone(), method);
        }

        let by_name: HashMap<String, usize> = properties
            .iter()
            .map(|p| (p.name().to_string(), p.index()))
            .collect();

        Ok(TypeDescriptor {
            name: self.name,
            ancestry,
            properties,
            by_name,
            methods,
            proxied: self.proxied || parent.is_some_and(|p| p.proxied),
            load_complete: self
                .load_complete
                .or_else(|| parent.and_then(|p| p.load_complete.clone())),
        })
    }
}

/// Explicit table of registered classes.
///
/// Descriptors are computed once at registration and shared by every
/// instance of the class.
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a class. A parent named by [`TypeBuilder::extends`] must
    /// already be registered.
    pub fn register(&self, builder: TypeBuilder) -> ModelResult<Arc<TypeDescriptor>> {
        let mut classes = self.classes.write().expect("class lock poisoned");
        if classes.contains_key(&builder.name) {
            return Err(ModelError::DuplicateClass(builder.name));
        }
        let parent = match &builder.parent {
            Some(name) => Some(
                classes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ModelError::UnknownClass(name.clone()))?,
            ),
            None => None,
        };
        let descriptor = Arc::new(builder.build(parent.as_deref())?);
        classes.insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.classes
            .read()
            .expect("class lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn require(&self, name: &str) -> ModelResult<Arc<TypeDescriptor>> {
        self.get(name)
            .ok_or_else(|| ModelError::UnknownClass(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes
            .read()
            .expect("class lock poisoned")
            .contains_key(name)
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .expect("class lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Construct a detached instance. Identity bookkeeping is the caller's
    /// concern; most callers want the identity registry instead.
    pub fn instantiate(&self, name: &str, uuid: Option<ObjectUuid>) -> ModelResult<ObjectHandle> {
        let descriptor = self.require(name)?;
        Ok(ObjectHandle::new(descriptor, uuid.unwrap_or_default()))
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.names())
            .finish()
    }
}
