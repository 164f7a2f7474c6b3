use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use tether_types::ObjectUuid;

use crate::error::MethodError;
use crate::object::ObjectHandle;
use crate::value::Value;

/// Result of a method invocation. Methods are always asynchronous contracts,
/// whether they run locally or on a peer.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, MethodError>> + Send>>;

/// A registered method body.
pub type MethodHandler = Arc<dyn Fn(ObjectHandle, Vec<Value>) -> MethodFuture + Send + Sync>;

/// Wrap an async closure as a [`MethodHandler`].
pub fn handler<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(ObjectHandle, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
{
    Arc::new(move |object, args| Box::pin(f(object, args)))
}

/// Carries method invocations on peer-owned objects to the owning peer.
pub trait MethodForwarder: Send + Sync {
    fn forward(&self, target: ObjectHandle, method: String, args: Vec<Value>) -> MethodFuture;
}

/// Association between an object and the endpoint that owns it.
#[derive(Clone)]
pub struct EndpointLink {
    endpoint_id: ObjectUuid,
    forwarder: Weak<dyn MethodForwarder>,
}

impl EndpointLink {
    pub fn new(endpoint_id: ObjectUuid, forwarder: Weak<dyn MethodForwarder>) -> Self {
        Self {
            endpoint_id,
            forwarder,
        }
    }

    pub fn endpoint_id(&self) -> ObjectUuid {
        self.endpoint_id
    }

    /// The forwarder, if the endpoint is still alive.
    pub fn forwarder(&self) -> Option<Arc<dyn MethodForwarder>> {
        self.forwarder.upgrade()
    }
}

impl fmt::Debug for EndpointLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointLink")
            .field("endpoint_id", &self.endpoint_id)
            .field("alive", &(self.forwarder.strong_count() > 0))
            .finish()
    }
}
