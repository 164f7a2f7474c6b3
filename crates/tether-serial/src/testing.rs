use std::sync::Arc;

use tether_model::{ClassRegistry, PropertyDescriptor, PropertyType, TypeBuilder, ValueShape};
use tether_registry::IdentityRegistry;

use crate::cache::SerializerCache;
use crate::context::LocalContext;

pub(crate) struct Fixture {
    pub classes: Arc<ClassRegistry>,
    pub registry: Arc<IdentityRegistry>,
    pub ctx: LocalContext,
}

pub(crate) fn fixture() -> Fixture {
    let classes = Arc::new(ClassRegistry::new());
    classes
        .register(
            TypeBuilder::new("Person")
                .property(PropertyDescriptor::new("name", ValueShape::text()).persistent())
                .property(PropertyDescriptor::new("partner", ValueShape::embed("Person")).persistent()),
        )
        .unwrap();
    classes
        .register(
            TypeBuilder::new("Page")
                .property(PropertyDescriptor::new("title", ValueShape::text()).persistent())
                .property(
                    PropertyDescriptor::new("count", ValueShape::integer())
                        .persistent()
                        .required()
                        .default_value(0i64),
                )
                .property(
                    PropertyDescriptor::new("status", ValueShape::enumeration(["draft", "published"]))
                        .persistent(),
                )
                .property(PropertyDescriptor::new("created", ValueShape::date()).persistent())
                .property(PropertyDescriptor::new("owner", ValueShape::reference("Person")).persistent())
                .property(
                    PropertyDescriptor::new(
                        "summary_of",
                        ValueShape::reference("Person").with_serializer("summary"),
                    )
                    .persistent(),
                )
                .property(
                    PropertyDescriptor::new("tags", PropertyType::list(ValueShape::text())).persistent(),
                )
                .property(
                    PropertyDescriptor::new("refs", PropertyType::list(ValueShape::any_reference()))
                        .persistent(),
                )
                .property(PropertyDescriptor::new("meta", PropertyType::map(ValueShape::any())).persistent())
                .property(PropertyDescriptor::new("secret", ValueShape::text())),
        )
        .unwrap();
    let registry = IdentityRegistry::new(Arc::clone(&classes));
    let serializers = Arc::new(SerializerCache::new(Arc::clone(&classes)));
    let ctx = LocalContext::new(Arc::clone(&registry), serializers);
    Fixture {
        classes,
        registry,
        ctx,
    }
}
