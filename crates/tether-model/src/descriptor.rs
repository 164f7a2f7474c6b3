use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tether_types::ValueKind;

use crate::keyed::KeyedCollection;
use crate::method::MethodHandler;
use crate::object::ObjectHandle;
use crate::ordered::OrderedCollection;
use crate::value::Value;

/// Validation applied to primitive values on the way in from JSON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveCheck {
    Boolean,
    Integer,
    Number,
    Text,
    Decimal,
    /// Text restricted to a fixed set of members.
    Enum(Vec<String>),
}

/// How a referenced object is carried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceShape {
    /// Required class (or ancestor class) of the referenced object.
    pub class: Option<String>,
    /// Serialize the referenced object inline instead of as a stub.
    pub embed: bool,
    /// Name of an explicitly registered serializer to use.
    pub serializer: Option<String>,
}

/// Shape of a single value: a scalar property, or one collection element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueShape {
    Primitive(Option<PrimitiveCheck>),
    Date,
    Embedded,
    Reference(ReferenceShape),
}

impl ValueShape {
    /// Unchecked primitive.
    pub fn any() -> Self {
        Self::Primitive(None)
    }

    pub fn boolean() -> Self {
        Self::Primitive(Some(PrimitiveCheck::Boolean))
    }

    pub fn integer() -> Self {
        Self::Primitive(Some(PrimitiveCheck::Integer))
    }

    pub fn number() -> Self {
        Self::Primitive(Some(PrimitiveCheck::Number))
    }

    pub fn text() -> Self {
        Self::Primitive(Some(PrimitiveCheck::Text))
    }

    pub fn decimal() -> Self {
        Self::Primitive(Some(PrimitiveCheck::Decimal))
    }

    pub fn enumeration<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Primitive(Some(PrimitiveCheck::Enum(
            members.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn date() -> Self {
        Self::Date
    }

    pub fn embedded() -> Self {
        Self::Embedded
    }

    /// Reference by identity, serialized as a stub.
    pub fn reference(class: impl Into<String>) -> Self {
        Self::Reference(ReferenceShape {
            class: Some(class.into()),
            ..ReferenceShape::default()
        })
    }

    /// Reference of any class, serialized as a stub.
    pub fn any_reference() -> Self {
        Self::Reference(ReferenceShape::default())
    }

    /// Reference serialized inline by the referenced object's serializer.
    pub fn embed(class: impl Into<String>) -> Self {
        Self::Reference(ReferenceShape {
            class: Some(class.into()),
            embed: true,
            serializer: None,
        })
    }

    /// Use the named serializer for referenced values. No effect on
    /// non-reference shapes.
    pub fn with_serializer(mut self, name: impl Into<String>) -> Self {
        if let Self::Reference(shape) = &mut self {
            shape.serializer = Some(name.into());
        }
        self
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Primitive(_) => ValueKind::Primitive,
            Self::Date => ValueKind::Date,
            Self::Embedded => ValueKind::EmbeddedValue,
            Self::Reference(_) => ValueKind::Reference,
        }
    }
}

/// The declared type of one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyType {
    Scalar(ValueShape),
    OrderedCollection(ValueShape),
    KeyedCollection {
        key: Option<PrimitiveCheck>,
        value: ValueShape,
    },
}

impl PropertyType {
    pub fn list(element: ValueShape) -> Self {
        Self::OrderedCollection(element)
    }

    pub fn map(value: ValueShape) -> Self {
        Self::KeyedCollection { key: None, value }
    }

    /// Keyed collection whose keys must pass `key` when read from JSON.
    pub fn map_with_keys(key: PrimitiveCheck, value: ValueShape) -> Self {
        Self::KeyedCollection {
            key: Some(key),
            value,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar(shape) => shape.kind(),
            Self::OrderedCollection(_) => ValueKind::OrderedCollection,
            Self::KeyedCollection { .. } => ValueKind::KeyedCollection,
        }
    }

    /// Shape of the scalar value or of each collection element.
    pub fn element_shape(&self) -> &ValueShape {
        match self {
            Self::Scalar(shape) | Self::OrderedCollection(shape) => shape,
            Self::KeyedCollection { value, .. } => value,
        }
    }
}

impl From<ValueShape> for PropertyType {
    fn from(shape: ValueShape) -> Self {
        Self::Scalar(shape)
    }
}

/// One declared property of a class.
///
/// Properties are transient unless marked [`persistent`](Self::persistent);
/// only persistent properties are serialized and watched.
#[derive(Clone, Debug)]
pub struct PropertyDescriptor {
    name: String,
    index: usize,
    ty: PropertyType,
    nullable: bool,
    persist: bool,
    default: Value,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, ty: impl Into<PropertyType>) -> Self {
        Self {
            name: name.into(),
            index: 0,
            ty: ty.into(),
            nullable: true,
            persist: false,
            default: Value::Null,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Null is replaced by the default value when read from JSON.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ty(&self) -> &PropertyType {
        &self.ty
    }

    pub fn kind(&self) -> ValueKind {
        self.ty.kind()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    /// Value a fresh instance starts with. Collection properties always get
    /// a new, empty collection of their own.
    pub fn initial_value(&self) -> Value {
        match self.ty {
            PropertyType::OrderedCollection(_) => Value::List(OrderedCollection::new()),
            PropertyType::KeyedCollection { .. } => Value::Map(KeyedCollection::new()),
            PropertyType::Scalar(_) => self.default.clone(),
        }
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }
}

/// One method of a class.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    /// May be invoked by a peer, and is forwarded when the class is proxied.
    pub remote: bool,
    pub handler: MethodHandler,
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("remote", &self.remote)
            .finish()
    }
}

/// Callback run once the whole object graph around an object has loaded.
pub type LoadCompleteHook = Arc<dyn Fn(&ObjectHandle) + Send + Sync>;

/// Immutable, shared description of one registered class.
pub struct TypeDescriptor {
    pub(crate) name: String,
    pub(crate) ancestry: Vec<String>,
    pub(crate) properties: Vec<PropertyDescriptor>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) methods: BTreeMap<String, MethodDescriptor>,
    pub(crate) proxied: bool,
    pub(crate) load_complete: Option<LoadCompleteHook>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct parent class, if any.
    pub fn parent(&self) -> Option<&str> {
        self.ancestry.get(1).map(String::as_str)
    }

    /// Returns `true` if this class is `class` or inherits from it.
    pub fn is_a(&self, class: &str) -> bool {
        self.ancestry.iter().any(|c| c == class)
    }

    /// All properties, inherited ones first, in index order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn persistent_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_persistent())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.by_name.get(name).map(|&i| &self.properties[i])
    }

    pub fn property_at(&self, index: usize) -> Option<&PropertyDescriptor> {
        self.properties.get(index)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    /// Remote methods invoked on objects owned by a peer are forwarded.
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub fn load_complete_hook(&self) -> Option<&LoadCompleteHook> {
        self.load_complete.as_ref()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("ancestry", &self.ancestry)
            .field("properties", &self.properties)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("proxied", &self.proxied)
            .finish()
    }
}
